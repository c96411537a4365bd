//! Escalation records and the feedback trigger.
//!
//! The trigger is a pure predicate over submitted feedback; it produces at
//! most one escalation per feedback event. Idempotency key is
//! `ticket_id:submitted_at` — re-evaluating unchanged feedback yields
//! nothing.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::types::{Feedback, OrganizationId, Ticket, TicketId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    SlaBreach,
    RepeatedComplaint,
    NegativeSentiment,
    TechnicalIssue,
    PartsUnavailable,
    UnsafeCondition,
    FraudSuspicion,
    CustomerRequest,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    City,
    State,
    Country,
    Organization,
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Acknowledged,
    InProgress,
    Resolved,
    Closed,
}

/// An escalation raised against a ticket. Never auto-deleted; a human works
/// it through its own status lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub ticket_id: TicketId,
    pub escalation_type: EscalationType,
    pub escalation_level: EscalationLevel,
    pub reason: String,
    #[serde(default)]
    pub escalated_by: Option<UserId>,
    pub status: EscalationStatus,
    /// Context payload (rating, dispute tags, feedback excerpt).
    #[serde(default)]
    pub extra_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(
        organization_id: OrganizationId,
        ticket_id: TicketId,
        escalation_type: EscalationType,
        escalation_level: EscalationLevel,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            ticket_id,
            escalation_type,
            escalation_level,
            reason: reason.into(),
            escalated_by: None,
            status: EscalationStatus::Pending,
            extra_data: serde_json::Value::Null,
            created_at,
        }
    }
}

/// Feedback thresholds; defaults match `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EscalationThresholds {
    /// Ratings at or below this escalate.
    pub max_rating: u8,
    /// Sentiment strictly below this escalates.
    pub sentiment_floor: f64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            max_rating: 2,
            sentiment_floor: -0.2,
        }
    }
}

/// Pure predicate: does this feedback warrant an escalation?
pub fn should_escalate(feedback: &Feedback, thresholds: &EscalationThresholds) -> bool {
    feedback.rating.is_some_and(|r| r <= thresholds.max_rating)
        || feedback
            .sentiment_score
            .is_some_and(|s| s < thresholds.sentiment_floor)
        || !feedback.dispute_tags.is_empty()
}

/// Seen keys older than this relative to the newest feedback are pruned,
/// keeping the set bounded over a long process lifetime. Deduplication of
/// events older than the window is the persistent store's unique-constraint
/// job, not this in-memory guard's.
const SEEN_RETENTION_DAYS: i64 = 30;

/// Evaluates feedback events and emits at most one escalation per event.
pub struct EscalationTrigger {
    thresholds: EscalationThresholds,
    seen: HashSet<(TicketId, i64)>,
}

impl EscalationTrigger {
    pub fn new(thresholds: EscalationThresholds) -> Self {
        Self {
            thresholds,
            seen: HashSet::new(),
        }
    }

    fn idempotency_key(feedback: &Feedback) -> (TicketId, i64) {
        (feedback.ticket_id, feedback.submitted_at.timestamp())
    }

    /// Evaluate one feedback submission against its ticket. Returns the
    /// escalation to persist, or `None` if the feedback is fine or this
    /// exact event was already handled within the retention window.
    pub fn evaluate(&mut self, ticket: &Ticket, feedback: &Feedback) -> Option<Escalation> {
        if !should_escalate(feedback, &self.thresholds) {
            return None;
        }
        let cutoff =
            (feedback.submitted_at - chrono::Duration::days(SEEN_RETENTION_DAYS)).timestamp();
        self.seen.retain(|(_, ts)| *ts >= cutoff);
        let key = Self::idempotency_key(feedback);
        if !self.seen.insert(key) {
            return None;
        }

        info!(
            ticket_id = ticket.id,
            rating = ?feedback.rating,
            sentiment = ?feedback.sentiment_score,
            "feedback flagged for escalation"
        );
        let mut escalation = Escalation::new(
            ticket.organization_id,
            ticket.id,
            EscalationType::NegativeSentiment,
            EscalationLevel::City,
            "Customer feedback flagged for review",
            feedback.submitted_at,
        );
        escalation.escalated_by = feedback.submitted_by;
        escalation.extra_data = json!({
            "rating": feedback.rating,
            "dispute_tags": feedback.dispute_tags,
            "feedback": feedback.feedback,
        });
        Some(escalation)
    }
}

impl Default for EscalationTrigger {
    fn default() -> Self {
        Self::new(EscalationThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn ticket() -> Ticket {
        Ticket::new(1, "TKT-0001", 10, "door seal torn", now())
    }

    fn feedback() -> Feedback {
        Feedback {
            ticket_id: 1,
            rating: None,
            feedback: None,
            sentiment_score: None,
            dispute_tags: Vec::new(),
            submitted_by: Some(42),
            submitted_at: now(),
        }
    }

    #[test]
    fn test_low_rating_triggers_exactly_once() {
        let mut trigger = EscalationTrigger::default();
        let t = ticket();
        let mut f = feedback();
        f.rating = Some(1);

        let escalation = trigger.evaluate(&t, &f).expect("should escalate");
        assert_eq!(escalation.escalation_type, EscalationType::NegativeSentiment);
        assert_eq!(escalation.escalation_level, EscalationLevel::City);
        assert_eq!(escalation.status, EscalationStatus::Pending);
        assert_eq!(escalation.extra_data["rating"], 1);

        // Same feedback event again: no duplicate.
        assert!(trigger.evaluate(&t, &f).is_none());
    }

    #[test]
    fn test_new_feedback_event_can_escalate_again() {
        let mut trigger = EscalationTrigger::default();
        let t = ticket();
        let mut f = feedback();
        f.rating = Some(2);
        assert!(trigger.evaluate(&t, &f).is_some());

        f.submitted_at = now() + chrono::Duration::hours(1);
        assert!(trigger.evaluate(&t, &f).is_some());
    }

    #[test]
    fn test_seen_set_prunes_outside_retention_window() {
        let mut trigger = EscalationTrigger::default();
        let t = ticket();
        let mut old = feedback();
        old.rating = Some(1);
        assert!(trigger.evaluate(&t, &old).is_some());
        assert!(trigger.evaluate(&t, &old).is_none());

        // A much newer event evicts keys past the retention window.
        let mut recent = feedback();
        recent.rating = Some(1);
        recent.submitted_at = now() + chrono::Duration::days(SEEN_RETENTION_DAYS + 10);
        assert!(trigger.evaluate(&t, &recent).is_some());
        assert_eq!(trigger.seen.len(), 1);

        // The aged-out key is gone; the store's unique constraint is the
        // backstop for replays this stale.
        assert!(trigger.evaluate(&t, &old).is_some());
    }

    #[test]
    fn test_sentiment_and_dispute_paths() {
        let thresholds = EscalationThresholds::default();

        let mut f = feedback();
        f.sentiment_score = Some(-0.5);
        assert!(should_escalate(&f, &thresholds));
        f.sentiment_score = Some(-0.2);
        assert!(!should_escalate(&f, &thresholds));

        let mut f = feedback();
        f.dispute_tags = vec!["overcharged".to_string()];
        assert!(should_escalate(&f, &thresholds));
    }

    #[test]
    fn test_good_feedback_does_not_escalate() {
        let mut trigger = EscalationTrigger::default();
        let mut f = feedback();
        f.rating = Some(5);
        f.sentiment_score = Some(0.8);
        assert!(trigger.evaluate(&ticket(), &f).is_none());
    }
}
