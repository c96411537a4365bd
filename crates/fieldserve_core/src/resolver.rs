//! Policy resolution by scope specificity.
//!
//! A candidate earns points for each scope filter it matches exactly and is
//! rejected outright when a filter it sets differs from the ticket — a policy
//! scoped to a location or product never matches a ticket outside that scope,
//! including tickets that do not carry the field at all. A policy with no
//! filters scores 0 and acts as the global fallback. Equal scores break
//! deterministically on the lowest policy id.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::policy::{ServicePolicy, SlaPolicy, SlaType};
use crate::types::{Device, LocationId, OrganizationId, ProductId, Ticket};

// Specificity weights. Product beats category beats city/state/country.
const SLA_WEIGHTS: ScopeWeights = ScopeWeights {
    product: 1000,
    category: 100,
    city: 10,
    state: 5,
    country: 1,
};
const SERVICE_WEIGHTS: ScopeWeights = ScopeWeights {
    product: 100,
    category: 10,
    city: 5,
    state: 3,
    country: 1,
};

struct ScopeWeights {
    product: i32,
    category: i32,
    city: i32,
    state: i32,
    country: i32,
}

/// The scope attributes of one ticket, the resolver's only view of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketCriteria {
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub product_category: Option<String>,
    #[serde(default)]
    pub country_id: Option<LocationId>,
    #[serde(default)]
    pub state_id: Option<LocationId>,
    #[serde(default)]
    pub city_id: Option<LocationId>,
}

impl TicketCriteria {
    /// Derive criteria from a ticket and its device, if any. Without a
    /// device category the ticket's issue category stands in, matching how
    /// policies are authored against either.
    pub fn from_ticket(ticket: &Ticket, device: Option<&Device>) -> Self {
        let product_id = device.and_then(|d| d.product_id);
        let product_category = device
            .and_then(|d| d.product_category.clone())
            .or_else(|| ticket.issue_category.clone());
        Self {
            organization_id: ticket.organization_id,
            product_id,
            product_category,
            country_id: ticket.country_id,
            state_id: ticket.state_id,
            city_id: ticket.city_id,
        }
    }
}

/// Score one nullable scope filter. An unset filter is a wildcard worth 0;
/// a set filter must equal the criteria value or the candidate is rejected.
fn scope_score<T: PartialEq>(filter: &Option<T>, value: &Option<T>, weight: i32) -> Option<i32> {
    match filter {
        None => Some(0),
        Some(f) => match value {
            Some(v) if v == f => Some(weight),
            _ => None,
        },
    }
}

fn specificity(
    weights: &ScopeWeights,
    product_id: &Option<ProductId>,
    product_category: &Option<String>,
    country_id: &Option<LocationId>,
    state_id: &Option<LocationId>,
    city_id: &Option<LocationId>,
    criteria: &TicketCriteria,
) -> Option<i32> {
    let mut score = 0;
    score += scope_score(product_id, &criteria.product_id, weights.product)?;
    score += scope_score(product_category, &criteria.product_category, weights.category)?;
    score += scope_score(city_id, &criteria.city_id, weights.city)?;
    score += scope_score(state_id, &criteria.state_id, weights.state)?;
    score += scope_score(country_id, &criteria.country_id, weights.country)?;
    Some(score)
}

/// Pick the single most specific active SLA policy for the criteria, or
/// `None` when nothing matches. "No policy" means "no SLA applied" — it is
/// never an error.
pub fn resolve_sla<'a>(
    policies: &'a [SlaPolicy],
    criteria: &TicketCriteria,
    sla_type: SlaType,
) -> Option<&'a SlaPolicy> {
    let mut best: Option<(i32, &SlaPolicy)> = None;

    for policy in policies {
        if policy.organization_id != criteria.organization_id
            || policy.sla_type != sla_type
            || !policy.is_active
        {
            continue;
        }
        let Some(score) = specificity(
            &SLA_WEIGHTS,
            &policy.product_id,
            &policy.product_category,
            &policy.country_id,
            &policy.state_id,
            &policy.city_id,
            criteria,
        ) else {
            continue;
        };

        // Highest score wins; equal scores break on the lowest policy id so
        // the result is stable for identical inputs regardless of list order.
        let better = match best {
            None => true,
            Some((best_score, best_policy)) => {
                score > best_score || (score == best_score && policy.id < best_policy.id)
            }
        };
        if better {
            best = Some((score, policy));
        }
    }

    if let Some((score, policy)) = best {
        debug!(
            policy_id = policy.id,
            score, ?sla_type, "resolved SLA policy"
        );
    }
    best.map(|(_, p)| p)
}

/// All matching active service policies, most specific first. Multiple
/// policy types coexist and are applied independently in this order.
pub fn resolve_service<'a>(
    policies: &'a [ServicePolicy],
    criteria: &TicketCriteria,
    policy_type: Option<&str>,
) -> Vec<&'a ServicePolicy> {
    let mut matched: Vec<(i32, &ServicePolicy)> = Vec::new();

    for policy in policies {
        if policy.organization_id != criteria.organization_id || !policy.is_active {
            continue;
        }
        if let Some(wanted) = policy_type {
            if policy.rules.policy_type() != wanted {
                continue;
            }
        }
        let Some(score) = specificity(
            &SERVICE_WEIGHTS,
            &policy.product_id,
            &policy.product_category,
            &policy.country_id,
            &policy.state_id,
            &policy.city_id,
            criteria,
        ) else {
            continue;
        };
        matched.push((score, policy));
    }

    matched.sort_by(|(sa, pa), (sb, pb)| sb.cmp(sa).then(pa.id.cmp(&pb.id)));
    matched.into_iter().map(|(_, p)| p).collect()
}
