//! Engineer selection and batch redispatch.
//!
//! Workload is always derived from the ticket snapshot handed in; there is
//! no package-level counter that could drift under concurrent dispatch. The
//! snapshot-pure functions here make the decision; committing it against the
//! authoritative store is the coordinator's job.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sla;
use crate::types::{Engineer, EngineerId, LocationId, OrganizationId, Ticket, TicketId};

/// Optional narrowing of the pool to one organization and/or city.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolFilter {
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub city_id: Option<LocationId>,
}

impl PoolFilter {
    pub fn accepts(&self, engineer: &Engineer) -> bool {
        if let Some(org) = self.organization_id {
            if engineer.organization_id != org {
                return false;
            }
        }
        if let Some(city) = self.city_id {
            if engineer.city_id != Some(city) {
                return false;
            }
        }
        true
    }
}

/// One redispatch decision, returned to the caller to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub ticket_id: TicketId,
    pub engineer_id: EngineerId,
    pub risk: f64,
    pub reason: String,
}

/// Advisory variant of an assignment, for admin review before committing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub ticket_id: TicketId,
    pub ticket_number: String,
    pub risk: f64,
    pub suggested_engineer_id: EngineerId,
    pub suggested_engineer_name: String,
    pub reason: String,
}

/// Active-ticket count for one engineer, derived fresh from the snapshot.
pub fn workload(engineer_id: EngineerId, tickets: &[Ticket]) -> usize {
    tickets
        .iter()
        .filter(|t| {
            t.assigned_engineer_id == Some(engineer_id) && t.status.counts_toward_workload()
        })
        .count()
}

fn workload_map(pool: &[&Engineer], tickets: &[Ticket]) -> HashMap<EngineerId, usize> {
    pool.iter().map(|e| (e.id, workload(e.id, tickets))).collect()
}

fn eligible<'a>(pool: &'a [Engineer], filter: &PoolFilter) -> Vec<&'a Engineer> {
    pool.iter()
        .filter(|e| e.is_eligible() && filter.accepts(e))
        .collect()
}

fn least_loaded<'a>(
    pool: &[&'a Engineer],
    loads: &HashMap<EngineerId, usize>,
) -> Option<&'a Engineer> {
    pool.iter()
        .copied()
        // Ties break on the lowest engineer id for determinism.
        .min_by_key(|e| (loads.get(&e.id).copied().unwrap_or(0), e.id))
}

/// Select the least-loaded eligible engineer for a single dispatch. `None`
/// when the filtered pool is empty — a retryable condition for the caller,
/// not a failure.
pub fn select_engineer<'a>(
    pool: &'a [Engineer],
    tickets: &[Ticket],
    filter: &PoolFilter,
) -> Option<&'a Engineer> {
    let candidates = eligible(pool, filter);
    if candidates.is_empty() {
        debug!(?filter, "no eligible engineer in pool");
        return None;
    }
    let loads = workload_map(&candidates, tickets);
    least_loaded(&candidates, &loads)
}

/// Batch redispatch knobs; defaults mirror `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct RedispatchParams {
    /// Minimum recomputed breach risk for a ticket to be considered.
    pub risk_threshold: f64,
    /// Cap on tickets processed in one batch.
    pub max_tickets: usize,
}

impl Default for RedispatchParams {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            max_tickets: 10,
        }
    }
}

/// Order at-risk tickets by descending recomputed breach risk, cap the
/// batch, drop frozen tickets, then repeatedly hand the least-loaded
/// engineer the next ticket. The local workload counter is incremented
/// immediately after each pick so one idle engineer cannot swallow the
/// whole batch.
pub fn redispatch(
    tickets: &[Ticket],
    pool: &[Engineer],
    filter: &PoolFilter,
    frozen: &HashSet<TicketId>,
    params: &RedispatchParams,
    now: DateTime<Utc>,
) -> Vec<Assignment> {
    let candidates = eligible(pool, filter);
    if candidates.is_empty() {
        info!("redispatch skipped, no eligible engineers");
        return Vec::new();
    }

    // Risk is recomputed from the same snapshot, never read from the cached
    // column.
    let mut at_risk: Vec<(&Ticket, f64)> = tickets
        .iter()
        .filter(|t| t.status.is_redispatchable())
        .map(|t| (t, sla::breach_risk(t, now)))
        .filter(|(_, risk)| *risk >= params.risk_threshold)
        .collect();
    at_risk.sort_by(|(ta, ra), (tb, rb)| {
        rb.partial_cmp(ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ta.id.cmp(&tb.id))
    });
    at_risk.truncate(params.max_tickets);

    let mut loads = workload_map(&candidates, tickets);
    let mut assignments = Vec::new();

    for (ticket, risk) in at_risk {
        if frozen.contains(&ticket.id) {
            debug!(ticket_id = ticket.id, "assignment frozen, skipping");
            continue;
        }
        let Some(engineer) = least_loaded(&candidates, &loads) else {
            break;
        };
        *loads.entry(engineer.id).or_insert(0) += 1;
        assignments.push(Assignment {
            ticket_id: ticket.id,
            engineer_id: engineer.id,
            risk,
            reason: format!(
                "Auto-redispatched to engineer {} due to SLA risk",
                engineer.id
            ),
        });
    }

    info!(redispatched = assignments.len(), "redispatch batch complete");
    assignments
}

/// Same selection walk as `redispatch`, but returns advisory suggestions
/// (with engineer names) instead of assignments to apply.
pub fn redispatch_suggestions(
    tickets: &[Ticket],
    pool: &[Engineer],
    filter: &PoolFilter,
    frozen: &HashSet<TicketId>,
    params: &RedispatchParams,
    now: DateTime<Utc>,
) -> Vec<Suggestion> {
    let by_id: HashMap<EngineerId, &Engineer> = pool.iter().map(|e| (e.id, e)).collect();
    let by_ticket: HashMap<TicketId, &Ticket> = tickets.iter().map(|t| (t.id, t)).collect();

    redispatch(tickets, pool, filter, frozen, params, now)
        .into_iter()
        .filter_map(|a| {
            let engineer = by_id.get(&a.engineer_id)?;
            let ticket = by_ticket.get(&a.ticket_id)?;
            Some(Suggestion {
                ticket_id: a.ticket_id,
                ticket_number: ticket.ticket_number.clone(),
                risk: a.risk,
                suggested_engineer_id: engineer.id,
                suggested_engineer_name: engineer.full_name.clone(),
                reason: "Lowest current workload and available".to_string(),
            })
        })
        .collect()
}
