//! Single-writer dispatch coordination.
//!
//! Two tickets dispatched concurrently must never both pick the same
//! engineer believing it is idle. A dedicated task owns all dispatch
//! decisions for one pool scope (organization + city) and processes
//! requests from a channel one at a time; each commit is still revalidated
//! by the store, and a lost race is retried with a fresh snapshot up to a
//! bounded attempt count before surfacing "no engineer available".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::dispatch::{self, PoolFilter};
use crate::error::EngineError;
use crate::store::DispatchStore;
use crate::types::{EngineerId, TicketId, TicketStatus, UserId};

const SCOPE_QUEUE_DEPTH: usize = 64;

struct DispatchRequest {
    ticket_id: TicketId,
    assigned_by: Option<UserId>,
    reply: oneshot::Sender<Result<EngineerId, EngineError>>,
}

pub struct DispatchCoordinator {
    store: Arc<dyn DispatchStore>,
    max_attempts: u32,
    scopes: Mutex<HashMap<PoolFilter, mpsc::Sender<DispatchRequest>>>,
}

impl DispatchCoordinator {
    pub fn new(store: Arc<dyn DispatchStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one ticket within a scope. Serialized against every other
    /// dispatch in the same scope.
    pub async fn dispatch(
        &self,
        ticket_id: TicketId,
        scope: PoolFilter,
        assigned_by: Option<UserId>,
    ) -> Result<EngineerId, EngineError> {
        let sender = self.scope_sender(scope).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(DispatchRequest {
                ticket_id,
                assigned_by,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::NoEligibleEngineer)?;
        reply_rx
            .await
            .unwrap_or(Err(EngineError::NoEligibleEngineer))
    }

    async fn scope_sender(&self, scope: PoolFilter) -> mpsc::Sender<DispatchRequest> {
        let mut scopes = self.scopes.lock().await;
        if let Some(sender) = scopes.get(&scope) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, mut rx) = mpsc::channel::<DispatchRequest>(SCOPE_QUEUE_DEPTH);
        let store = Arc::clone(&self.store);
        let max_attempts = self.max_attempts;
        tokio::spawn(async move {
            debug!(?scope, "dispatch worker started");
            while let Some(request) = rx.recv().await {
                let result = dispatch_with_retries(
                    store.as_ref(),
                    &scope,
                    request.ticket_id,
                    request.assigned_by,
                    max_attempts,
                );
                // Caller may have given up waiting; dropping the result is fine.
                let _ = request.reply.send(result);
            }
            debug!(?scope, "dispatch worker stopped");
        });
        scopes.insert(scope, tx.clone());
        tx
    }
}

fn dispatch_with_retries(
    store: &dyn DispatchStore,
    scope: &PoolFilter,
    ticket_id: TicketId,
    assigned_by: Option<UserId>,
    max_attempts: u32,
) -> Result<EngineerId, EngineError> {
    if store.is_assignment_frozen(ticket_id) {
        return Err(EngineError::AssignmentFrozen(ticket_id));
    }
    let ticket = store
        .load_ticket(ticket_id)
        .ok_or(EngineError::TicketNotFound(ticket_id))?;
    if ticket.status != TicketStatus::Created {
        return Err(EngineError::InvalidTransition {
            from: ticket.status,
            event: "assign",
        });
    }

    for attempt in 1..=max_attempts {
        // Fresh snapshot every attempt.
        let engineers = store.load_eligible_engineers(scope);
        let tickets = store.active_tickets(scope);
        let Some(engineer) = dispatch::select_engineer(&engineers, &tickets, scope) else {
            return Err(EngineError::NoEligibleEngineer);
        };
        let observed = dispatch::workload(engineer.id, &tickets);

        match store.commit_assignment(ticket_id, engineer.id, observed, assigned_by, Utc::now()) {
            Ok(()) => {
                debug!(ticket_id, engineer_id = engineer.id, attempt, "dispatch committed");
                return Ok(engineer.id);
            }
            Err(EngineError::ConcurrentAssignmentConflict { .. }) => {
                warn!(ticket_id, attempt, "assignment conflict, retrying with fresh snapshot");
                continue;
            }
            Err(other) => return Err(other),
        }
    }

    // Attempts exhausted: equivalent to an empty pool from the caller's
    // point of view, retryable later.
    Err(EngineError::NoEligibleEngineer)
}
