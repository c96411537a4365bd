//! Core domain types: tickets, engineers, devices, feedback.
//!
//! `status` is the single source of truth for ticket lifecycle; the audit
//! timestamps (`assigned_at`, `started_at`, ...) are set only as a side
//! effect of a transition and are never read back to infer state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub type TicketId = u64;
pub type EngineerId = u64;
pub type OrganizationId = u64;
pub type UserId = u64;
pub type DeviceId = u64;
pub type ProductId = u64;
pub type LocationId = u64;
pub type PolicyId = u64;

// ============================================================================
// Status & Priority
// ============================================================================

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Created,
    Assigned,
    InProgress,
    WaitingParts,
    Resolved,
    Closed,
    Cancelled,
    Escalated,
}

impl TicketStatus {
    /// Soft terminal states; tickets are never physically deleted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Closed | TicketStatus::Cancelled)
    }

    /// Statuses that count toward an engineer's active workload.
    pub fn counts_toward_workload(&self) -> bool {
        matches!(self, TicketStatus::Assigned | TicketStatus::InProgress)
    }

    /// Statuses eligible for automatic redispatch.
    pub fn is_redispatchable(&self) -> bool {
        matches!(
            self,
            TicketStatus::Created | TicketStatus::Assigned | TicketStatus::InProgress
        )
    }

    /// Engineer has not started work yet.
    pub fn is_unstarted(&self) -> bool {
        matches!(self, TicketStatus::Created | TicketStatus::Assigned)
    }

    pub fn description(&self) -> &'static str {
        match self {
            TicketStatus::Created => "Awaiting assignment",
            TicketStatus::Assigned => "Assigned to engineer",
            TicketStatus::InProgress => "Work in progress",
            TicketStatus::WaitingParts => "Waiting for parts",
            TicketStatus::Resolved => "Resolved, pending closure",
            TicketStatus::Closed => "Closed",
            TicketStatus::Cancelled => "Cancelled",
            TicketStatus::Escalated => "Escalated for review",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketStatus::Created => "created",
            TicketStatus::Assigned => "assigned",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::WaitingParts => "waiting_parts",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Escalated => "escalated",
        };
        write!(f, "{}", s)
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TicketPriority {
    /// High and urgent tickets carry extra SLA breach weight.
    pub fn is_expedited(&self) -> bool {
        matches!(self, TicketPriority::High | TicketPriority::Urgent)
    }
}

/// Warranty classification derived from service policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyStatus {
    InWarranty,
    OutOfWarranty,
    Unknown,
}

impl Default for WarrantyStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Parts the engineer recorded at resolution. Recorded as intent only;
/// inventory deduction happens after an out-of-scope approval step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartUsage {
    pub part_id: u64,
    pub quantity: u32,
}

/// The unit of work. Created by intake, mutated only through transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub ticket_number: String,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,

    // Assignment
    #[serde(default)]
    pub assigned_engineer_id: Option<EngineerId>,
    #[serde(default)]
    pub assigned_by_id: Option<UserId>,
    #[serde(default)]
    pub created_by_id: Option<UserId>,
    #[serde(default)]
    pub parent_ticket_id: Option<TicketId>,

    // Location scope
    #[serde(default)]
    pub country_id: Option<LocationId>,
    #[serde(default)]
    pub state_id: Option<LocationId>,
    #[serde(default)]
    pub city_id: Option<LocationId>,

    // Issue
    #[serde(default)]
    pub issue_category: Option<String>,
    pub issue_description: String,

    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,

    // SLA
    #[serde(default)]
    pub sla_deadline: Option<DateTime<Utc>>,
    /// Persisted only as a listing/sorting cache; decisions always recompute.
    #[serde(default)]
    pub sla_breach_risk: Option<f64>,

    // Warranty / billing
    #[serde(default)]
    pub warranty_status: WarrantyStatus,
    #[serde(default)]
    pub is_chargeable: bool,

    // Resolution
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub resolution_photos: Vec<String>,
    #[serde(default)]
    pub parts_used: Vec<PartUsage>,

    // Feedback
    #[serde(default)]
    pub customer_rating: Option<u8>,
    #[serde(default)]
    pub customer_feedback: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub dispute_tags: Vec<String>,

    // ETA window shared by the engineer at start
    #[serde(default)]
    pub engineer_eta_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engineer_eta_end: Option<DateTime<Utc>>,

    // Audit timestamps (write-only side effects of transitions)
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,

    /// Status before an escalation overlay, restored when a human clears it.
    #[serde(default)]
    pub escalated_from: Option<TicketStatus>,
}

impl Ticket {
    /// New ticket in CREATED with everything else empty.
    pub fn new(
        id: TicketId,
        ticket_number: impl Into<String>,
        organization_id: OrganizationId,
        issue_description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            ticket_number: ticket_number.into(),
            organization_id,
            customer_id: None,
            device_id: None,
            assigned_engineer_id: None,
            assigned_by_id: None,
            created_by_id: None,
            parent_ticket_id: None,
            country_id: None,
            state_id: None,
            city_id: None,
            issue_category: None,
            issue_description: issue_description.into(),
            status: TicketStatus::Created,
            priority: TicketPriority::default(),
            sla_deadline: None,
            sla_breach_risk: None,
            warranty_status: WarrantyStatus::Unknown,
            is_chargeable: false,
            resolution_notes: None,
            resolution_photos: Vec::new(),
            parts_used: Vec::new(),
            customer_rating: None,
            customer_feedback: None,
            sentiment_score: None,
            dispute_tags: Vec::new(),
            engineer_eta_start: None,
            engineer_eta_end: None,
            created_at,
            assigned_at: None,
            started_at: None,
            resolved_at: None,
            closed_at: None,
            escalated_from: None,
        }
    }

    /// Link a follow-up ticket to its parent. A ticket can never be its own
    /// parent; chains are forward references only, never back-pointers.
    pub fn link_parent(&mut self, parent_id: TicketId) -> Result<(), EngineError> {
        if parent_id == self.id {
            return Err(EngineError::SelfParent(self.id));
        }
        self.parent_ticket_id = Some(parent_id);
        Ok(())
    }

    pub fn is_follow_up(&self) -> bool {
        self.parent_ticket_id.is_some()
    }

    /// Assignment field consistency: an engineer is attached exactly in the
    /// post-assignment statuses. An escalation overlay inherits the rule of
    /// the status it covers.
    pub fn assignment_consistent(&self) -> bool {
        let effective = match self.status {
            TicketStatus::Escalated => self.escalated_from.unwrap_or(TicketStatus::Created),
            other => other,
        };
        let expects_engineer = matches!(
            effective,
            TicketStatus::Assigned
                | TicketStatus::InProgress
                | TicketStatus::WaitingParts
                | TicketStatus::Resolved
                | TicketStatus::Closed
        );
        expects_engineer == self.assigned_engineer_id.is_some()
    }
}

// ============================================================================
// Engineer & Device
// ============================================================================

/// A field engineer: the dispatchable view of a user. The active ticket count
/// is deliberately absent, it is always derived from a ticket snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engineer {
    pub id: EngineerId,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub city_id: Option<LocationId>,
    #[serde(default)]
    pub full_name: String,
    pub is_available: bool,
    pub is_active: bool,
    #[serde(default)]
    pub skill_level: u8,
}

impl Engineer {
    pub fn is_eligible(&self) -> bool {
        self.is_available && self.is_active
    }
}

/// Device under service; supplies product scope and warranty anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub product_category: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Feedback
// ============================================================================

/// Customer feedback submitted after resolution. `submitted_at` is part of
/// the escalation idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub ticket_id: TicketId,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub dispute_tags: Vec<String>,
    #[serde(default)]
    pub submitted_by: Option<UserId>,
    pub submitted_at: DateTime<Utc>,
}
