//! Persistence boundary.
//!
//! The engine consumes snapshots through these traits and returns decisions;
//! it never owns a connection. `MemoryStore` backs tests and the simulator
//! with the same contract a database-backed store must honor, including the
//! commit-time revalidation that makes concurrent dispatch safe.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::dispatch::PoolFilter;
use crate::error::EngineError;
use crate::policy::{PolicySet, ServicePolicy, SlaPolicy, SlaType};
use crate::state_machine::{transition, TicketEvent};
use crate::types::{Engineer, EngineerId, OrganizationId, Ticket, TicketId, TicketStatus, UserId};

pub trait PolicyStore: Send + Sync {
    fn load_active_sla_policies(
        &self,
        organization_id: OrganizationId,
        sla_type: SlaType,
    ) -> Vec<SlaPolicy>;

    fn load_active_service_policies(&self, organization_id: OrganizationId) -> Vec<ServicePolicy>;

    /// One consistent snapshot of everything active for an organization.
    fn load_policy_set(&self, organization_id: OrganizationId) -> PolicySet {
        let mut sla = Vec::new();
        for sla_type in [
            SlaType::FirstResponse,
            SlaType::Assignment,
            SlaType::Resolution,
            SlaType::OnSite,
        ] {
            sla.extend(self.load_active_sla_policies(organization_id, sla_type));
        }
        PolicySet::new(sla, self.load_active_service_policies(organization_id))
    }
}

pub trait TicketStore: Send + Sync {
    fn load_ticket(&self, id: TicketId) -> Option<Ticket>;

    fn save_ticket(&self, ticket: &Ticket);

    /// Non-terminal tickets for the scope's organization; the workload
    /// snapshot for dispatch decisions.
    fn active_tickets(&self, filter: &PoolFilter) -> Vec<Ticket>;

    /// First-class freeze flag; a frozen ticket is excluded from any
    /// automatic (re)dispatch, manual assignment is unaffected.
    fn is_assignment_frozen(&self, id: TicketId) -> bool;
}

pub trait EngineerStore: Send + Sync {
    fn load_eligible_engineers(&self, filter: &PoolFilter) -> Vec<Engineer>;
}

/// Everything the dispatch coordinator needs, plus the validated commit.
pub trait DispatchStore: TicketStore + EngineerStore {
    /// Atomically assign `engineer_id` to `ticket_id`, revalidating against
    /// the authoritative state: the engineer must still be eligible, the
    /// ticket still unassigned, and the engineer's workload unchanged from
    /// `observed_workload`. Any drift returns
    /// `ConcurrentAssignmentConflict` so the caller retries with a fresh
    /// snapshot.
    fn commit_assignment(
        &self,
        ticket_id: TicketId,
        engineer_id: EngineerId,
        observed_workload: usize,
        assigned_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Apply one redispatch decision: move an already-assigned (or started)
    /// ticket to `engineer_id`, with the same revalidation as
    /// `commit_assignment`. A ticket that left the redispatchable statuses
    /// between snapshot and commit returns `ConcurrentAssignmentConflict`.
    fn commit_reassignment(
        &self,
        ticket_id: TicketId,
        engineer_id: EngineerId,
        observed_workload: usize,
        assigned_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    tickets: HashMap<TicketId, Ticket>,
    engineers: HashMap<EngineerId, Engineer>,
    sla_policies: Vec<SlaPolicy>,
    service_policies: Vec<ServicePolicy>,
    frozen: HashSet<TicketId>,
}

/// Snapshot-per-call in-memory store for tests and the simulator.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ticket(&self, ticket: Ticket) {
        self.state.lock().unwrap().tickets.insert(ticket.id, ticket);
    }

    pub fn insert_engineer(&self, engineer: Engineer) {
        self.state
            .lock()
            .unwrap()
            .engineers
            .insert(engineer.id, engineer);
    }

    pub fn insert_sla_policy(&self, policy: SlaPolicy) {
        self.state.lock().unwrap().sla_policies.push(policy);
    }

    pub fn insert_service_policy(&self, policy: ServicePolicy) {
        self.state.lock().unwrap().service_policies.push(policy);
    }

    pub fn set_frozen(&self, ticket_id: TicketId, frozen: bool) {
        let mut state = self.state.lock().unwrap();
        if frozen {
            state.frozen.insert(ticket_id);
        } else {
            state.frozen.remove(&ticket_id);
        }
    }

    pub fn set_engineer_available(&self, engineer_id: EngineerId, available: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.engineers.get_mut(&engineer_id) {
            e.is_available = available;
        }
    }
}

impl PolicyStore for MemoryStore {
    fn load_active_sla_policies(
        &self,
        organization_id: OrganizationId,
        sla_type: SlaType,
    ) -> Vec<SlaPolicy> {
        self.state
            .lock()
            .unwrap()
            .sla_policies
            .iter()
            .filter(|p| {
                p.organization_id == organization_id && p.sla_type == sla_type && p.is_active
            })
            .cloned()
            .collect()
    }

    fn load_active_service_policies(&self, organization_id: OrganizationId) -> Vec<ServicePolicy> {
        self.state
            .lock()
            .unwrap()
            .service_policies
            .iter()
            .filter(|p| p.organization_id == organization_id && p.is_active)
            .cloned()
            .collect()
    }
}

impl TicketStore for MemoryStore {
    fn load_ticket(&self, id: TicketId) -> Option<Ticket> {
        self.state.lock().unwrap().tickets.get(&id).cloned()
    }

    fn save_ticket(&self, ticket: &Ticket) {
        self.state
            .lock()
            .unwrap()
            .tickets
            .insert(ticket.id, ticket.clone());
    }

    fn active_tickets(&self, filter: &PoolFilter) -> Vec<Ticket> {
        self.state
            .lock()
            .unwrap()
            .tickets
            .values()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| {
                filter
                    .organization_id
                    .map_or(true, |org| t.organization_id == org)
            })
            .cloned()
            .collect()
    }

    fn is_assignment_frozen(&self, id: TicketId) -> bool {
        self.state.lock().unwrap().frozen.contains(&id)
    }
}

impl EngineerStore for MemoryStore {
    fn load_eligible_engineers(&self, filter: &PoolFilter) -> Vec<Engineer> {
        self.state
            .lock()
            .unwrap()
            .engineers
            .values()
            .filter(|e| e.is_eligible() && filter.accepts(e))
            .cloned()
            .collect()
    }
}

impl DispatchStore for MemoryStore {
    fn commit_assignment(
        &self,
        ticket_id: TicketId,
        engineer_id: EngineerId,
        observed_workload: usize,
        assigned_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();

        let engineer_ok = state
            .engineers
            .get(&engineer_id)
            .map(|e| e.is_eligible())
            .unwrap_or(false);
        if !engineer_ok {
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }

        let current_workload = state
            .tickets
            .values()
            .filter(|t| {
                t.assigned_engineer_id == Some(engineer_id) && t.status.counts_toward_workload()
            })
            .count();
        if current_workload != observed_workload {
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }

        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or(EngineError::TicketNotFound(ticket_id))?;
        if ticket.status != TicketStatus::Created {
            // Someone else assigned it between snapshot and commit.
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }
        transition(
            ticket,
            TicketEvent::Assign {
                engineer_id,
                assigned_by,
            },
            now,
        )?;
        Ok(())
    }

    fn commit_reassignment(
        &self,
        ticket_id: TicketId,
        engineer_id: EngineerId,
        observed_workload: usize,
        assigned_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();

        let engineer_ok = state
            .engineers
            .get(&engineer_id)
            .map(|e| e.is_eligible())
            .unwrap_or(false);
        if !engineer_ok {
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }

        let current_workload = state
            .tickets
            .values()
            .filter(|t| {
                t.assigned_engineer_id == Some(engineer_id) && t.status.counts_toward_workload()
            })
            .count();
        if current_workload != observed_workload {
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }

        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or(EngineError::TicketNotFound(ticket_id))?;
        if !matches!(
            ticket.status,
            TicketStatus::Assigned | TicketStatus::InProgress
        ) {
            // Resolved, cancelled, or bounced back to created since the
            // snapshot was taken.
            return Err(EngineError::ConcurrentAssignmentConflict { attempts: 1 });
        }
        transition(
            ticket,
            TicketEvent::Reassign {
                engineer_id,
                assigned_by,
            },
            now,
        )?;
        Ok(())
    }
}
