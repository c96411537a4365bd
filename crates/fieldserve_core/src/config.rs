//! Engine configuration.
//!
//! TOML file with full defaults; a missing file or missing section falls
//! back to the documented default values.
//!
//! ```toml
//! [dispatch]
//! max_attempts = 3
//! risk_threshold = 0.7
//! max_batch = 10
//!
//! [escalation]
//! max_rating = 2
//! sentiment_floor = -0.2
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Dispatch and redispatch knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Bounded retries after a lost assignment race.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum breach risk for a ticket to enter a redispatch batch.
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,

    /// Cap on tickets per redispatch batch.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_risk_threshold() -> f64 {
    0.7
}

fn default_max_batch() -> usize {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            risk_threshold: default_risk_threshold(),
            max_batch: default_max_batch(),
        }
    }
}

/// Feedback escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Ratings at or below this escalate.
    #[serde(default = "default_max_rating")]
    pub max_rating: u8,

    /// Sentiment strictly below this escalates.
    #[serde(default = "default_sentiment_floor")]
    pub sentiment_floor: f64,
}

fn default_max_rating() -> u8 {
    2
}

fn default_sentiment_floor() -> f64 {
    -0.2
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_rating: default_max_rating(),
            sentiment_floor: default_sentiment_floor(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Load from a TOML file if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.max_batch, 10);
        assert!((config.dispatch.risk_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.escalation.max_rating, 2);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nmax_batch = 25").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.dispatch.max_batch, 25);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.escalation.max_rating, 2);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load_or_default(Path::new("/nonexistent/fieldserve.toml"));
        assert_eq!(config.dispatch.max_attempts, 3);
    }
}
