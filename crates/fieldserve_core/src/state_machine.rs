//! Ticket status state machine.
//!
//! CREATED -> ASSIGNED -> IN_PROGRESS -> {WAITING_PARTS <-> IN_PROGRESS}
//! -> RESOLVED -> CLOSED, with side branches for rejection/reschedule
//! (back to CREATED), cancellation, and the escalation overlay.
//!
//! Every transition is a single atomic decision: all guards are checked
//! before the first field is written, so a failed guard leaves the ticket
//! untouched and comes back as a typed `EngineError`, never a best-effort
//! fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::types::{EngineerId, PartUsage, Ticket, TicketStatus, UserId};

/// Lifecycle events a caller can apply to a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TicketEvent {
    /// Attach a selected engineer (dispatch decision already made).
    Assign {
        engineer_id: EngineerId,
        #[serde(default)]
        assigned_by: Option<UserId>,
    },
    /// Move the assignment to another engineer (a redispatch decision).
    /// An in-progress ticket drops back to assigned for the new engineer.
    Reassign {
        engineer_id: EngineerId,
        #[serde(default)]
        assigned_by: Option<UserId>,
    },
    /// Engineer acknowledges the assignment.
    Accept { engineer_id: EngineerId },
    /// Engineer rejects; assignment fields are cleared.
    Reject { engineer_id: EngineerId },
    /// Customer reschedules; assignment fields are cleared.
    Reschedule,
    /// Assigned engineer starts work, optionally sharing an ETA window.
    Start {
        engineer_id: EngineerId,
        #[serde(default)]
        eta_start: Option<DateTime<Utc>>,
        #[serde(default)]
        eta_end: Option<DateTime<Utc>>,
    },
    /// Parts ordered for the job.
    PartsOrdered,
    /// Parts usage submitted for approval.
    PartsApprovalRequested,
    /// Ordered parts arrived.
    PartsReceived,
    /// Engineer resolves with notes; parts usage is recorded as intent only,
    /// inventory deduction waits for an out-of-scope approval step.
    Resolve {
        engineer_id: EngineerId,
        notes: String,
        #[serde(default)]
        parts_used: Vec<PartUsage>,
        #[serde(default)]
        photos: Vec<String>,
    },
    /// Overlay the ticket with ESCALATED, preserving the prior status.
    Escalate,
    /// Human clears the escalation overlay, restoring the prior status.
    ClearEscalation,
    Cancel,
    Close,
}

impl TicketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TicketEvent::Assign { .. } => "assign",
            TicketEvent::Reassign { .. } => "reassign",
            TicketEvent::Accept { .. } => "accept",
            TicketEvent::Reject { .. } => "reject",
            TicketEvent::Reschedule => "reschedule",
            TicketEvent::Start { .. } => "start",
            TicketEvent::PartsOrdered => "parts_ordered",
            TicketEvent::PartsApprovalRequested => "parts_approval_requested",
            TicketEvent::PartsReceived => "parts_received",
            TicketEvent::Resolve { .. } => "resolve",
            TicketEvent::Escalate => "escalate",
            TicketEvent::ClearEscalation => "clear_escalation",
            TicketEvent::Cancel => "cancel",
            TicketEvent::Close => "close",
        }
    }
}

fn invalid(ticket: &Ticket, event: &TicketEvent) -> EngineError {
    EngineError::InvalidTransition {
        from: ticket.status,
        event: event.name(),
    }
}

/// Guard that the acting engineer holds the assignment.
fn require_assigned_engineer(ticket: &Ticket, acting: EngineerId) -> Result<(), EngineError> {
    if ticket.assigned_engineer_id != Some(acting) {
        return Err(EngineError::WrongEngineer {
            expected: ticket.assigned_engineer_id,
            actual: acting,
        });
    }
    Ok(())
}

/// Apply one event to a ticket. On success the new status is returned and
/// the ticket (including audit timestamps) is updated; on error the ticket
/// is guaranteed unmodified.
pub fn transition(
    ticket: &mut Ticket,
    event: TicketEvent,
    now: DateTime<Utc>,
) -> Result<TicketStatus, EngineError> {
    use TicketStatus::*;

    let new_status = match (&ticket.status, &event) {
        (Created, TicketEvent::Assign { .. }) => Assigned,
        (Assigned, TicketEvent::Reassign { .. }) | (InProgress, TicketEvent::Reassign { .. }) => {
            Assigned
        }
        (Assigned, TicketEvent::Accept { engineer_id }) => {
            require_assigned_engineer(ticket, *engineer_id)?;
            Assigned
        }
        (Assigned, TicketEvent::Reject { engineer_id }) => {
            require_assigned_engineer(ticket, *engineer_id)?;
            Created
        }
        (Assigned, TicketEvent::Reschedule) => Created,
        (Assigned, TicketEvent::Start { engineer_id, .. }) => {
            require_assigned_engineer(ticket, *engineer_id)?;
            InProgress
        }
        (InProgress, TicketEvent::PartsOrdered)
        | (InProgress, TicketEvent::PartsApprovalRequested) => WaitingParts,
        (WaitingParts, TicketEvent::PartsReceived) => InProgress,
        (InProgress, TicketEvent::Resolve { engineer_id, notes, .. }) => {
            require_assigned_engineer(ticket, *engineer_id)?;
            if notes.trim().is_empty() {
                return Err(EngineError::MissingRequiredField("resolution_notes"));
            }
            Resolved
        }
        (Escalated, TicketEvent::ClearEscalation) => {
            ticket.escalated_from.unwrap_or(Created)
        }
        (from, TicketEvent::Escalate) if !from.is_terminal() && *from != Escalated => Escalated,
        (Created, TicketEvent::Cancel) | (Assigned, TicketEvent::Cancel) => Cancelled,
        (Resolved, TicketEvent::Close) => Closed,
        _ => return Err(invalid(ticket, &event)),
    };

    // Guards passed; apply side effects.
    match event {
        TicketEvent::Assign {
            engineer_id,
            assigned_by,
        } => {
            ticket.assigned_engineer_id = Some(engineer_id);
            ticket.assigned_by_id = assigned_by;
            ticket.assigned_at = Some(now);
        }
        TicketEvent::Reassign {
            engineer_id,
            assigned_by,
        } => {
            ticket.assigned_engineer_id = Some(engineer_id);
            ticket.assigned_by_id = assigned_by;
            ticket.assigned_at = Some(now);
            // The new engineer has not started; any previous progress marker
            // and ETA window belong to the old assignment.
            ticket.started_at = None;
            ticket.engineer_eta_start = None;
            ticket.engineer_eta_end = None;
        }
        TicketEvent::Accept { .. } => {}
        TicketEvent::Reject { .. } | TicketEvent::Reschedule | TicketEvent::Cancel => {
            ticket.assigned_engineer_id = None;
            ticket.assigned_by_id = None;
            ticket.assigned_at = None;
            if new_status == Cancelled {
                ticket.closed_at = Some(now);
            }
        }
        TicketEvent::Start {
            eta_start, eta_end, ..
        } => {
            ticket.started_at = Some(now);
            ticket.engineer_eta_start = eta_start;
            ticket.engineer_eta_end = eta_end;
        }
        TicketEvent::PartsOrdered
        | TicketEvent::PartsApprovalRequested
        | TicketEvent::PartsReceived => {}
        TicketEvent::Resolve {
            notes,
            parts_used,
            photos,
            ..
        } => {
            ticket.resolution_notes = Some(notes);
            ticket.parts_used = parts_used;
            ticket.resolution_photos = photos;
            ticket.resolved_at = Some(now);
        }
        TicketEvent::Escalate => {
            ticket.escalated_from = Some(ticket.status);
        }
        TicketEvent::ClearEscalation => {
            ticket.escalated_from = None;
        }
        TicketEvent::Close => {
            ticket.closed_at = Some(now);
        }
    }

    debug!(
        ticket_id = ticket.id,
        from = %ticket.status,
        to = %new_status,
        "ticket transition"
    );
    ticket.status = new_status;
    Ok(new_status)
}
