//! Error types for the Fieldserve engine.
//!
//! Every decision path returns these as typed results; nothing in the core
//! falls back to a plausible-looking guess. "No matching policy" is not an
//! error at all — resolvers return `None` and callers treat the absence of a
//! deadline as meaningful.

use thiserror::Error;

use crate::types::{EngineerId, TicketId, TicketStatus};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid transition: {event} is not legal from {from}")]
    InvalidTransition {
        from: TicketStatus,
        event: &'static str,
    },

    #[error("No eligible engineer available for dispatch")]
    NoEligibleEngineer,

    #[error("Assignment conflict after {attempts} attempts, pool state changed underneath us")]
    ConcurrentAssignmentConflict { attempts: u32 },

    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("Acting engineer {actual} is not the assigned engineer")]
    WrongEngineer {
        expected: Option<EngineerId>,
        actual: EngineerId,
    },

    #[error("Ticket {0} has a frozen assignment, automatic dispatch skipped")]
    AssignmentFrozen(TicketId),

    #[error("Ticket {0} not found in snapshot")]
    TicketNotFound(TicketId),

    #[error("A ticket cannot be its own parent")]
    SelfParent(TicketId),
}

impl EngineError {
    /// Suggested HTTP status for callers translating engine results.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::InvalidTransition { .. } => 409,
            EngineError::NoEligibleEngineer => 503,
            EngineError::ConcurrentAssignmentConflict { .. } => 503,
            EngineError::MissingRequiredField(_) => 400,
            EngineError::WrongEngineer { .. } => 403,
            EngineError::AssignmentFrozen(_) => 409,
            EngineError::TicketNotFound(_) => 404,
            EngineError::SelfParent(_) => 400,
        }
    }

    /// True when the caller may retry the same operation later without
    /// changing the request (pool may have refilled, conflict may clear).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NoEligibleEngineer | EngineError::ConcurrentAssignmentConflict { .. }
        )
    }
}
