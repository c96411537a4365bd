//! Engine facade.
//!
//! Everything here is a pure function over a snapshot of data the caller
//! fetched through the store traits; side effects (writes, notifications)
//! are applied by the caller after the engine returns its decision. The
//! only held state is the escalation trigger's idempotency set.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::dispatch::{self, Assignment, PoolFilter, RedispatchParams, Suggestion};
use crate::error::EngineError;
use crate::escalation::{Escalation, EscalationThresholds, EscalationTrigger};
use crate::policy::{ChargeableRules, PolicySet, ServiceRules, SlaType, WarrantyRules};
use crate::resolver::{self, TicketCriteria};
use crate::sla;
use crate::state_machine::{self, TicketEvent};
use crate::types::{
    Device, Engineer, Feedback, PolicyId, Ticket, TicketId, TicketStatus, WarrantyStatus,
};

/// Result of resolving the SLA clock for one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaResolution {
    pub policy_id: PolicyId,
    pub deadline: DateTime<Utc>,
}

/// Audit entry for one service policy that applied to a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedPolicy {
    pub policy_id: PolicyId,
    pub policy_type: String,
}

/// Composition of every matching service policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub warranty_status: WarrantyStatus,
    pub is_chargeable: bool,
    #[serde(default)]
    pub pricing: serde_json::Value,
    #[serde(default)]
    pub parts_policy: serde_json::Value,
    #[serde(default)]
    pub applied_policies: Vec<AppliedPolicy>,
}

/// Stateless decision engine plus the escalation idempotency set.
pub struct Engine {
    config: EngineConfig,
    trigger: EscalationTrigger,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let thresholds = EscalationThresholds {
            max_rating: config.escalation.max_rating,
            sentiment_floor: config.escalation.sentiment_floor,
        };
        Self {
            config,
            trigger: EscalationTrigger::new(thresholds),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve the SLA policy and deadline for a ticket. `Ok(None)` means no
    /// active policy matched — the ticket simply carries no SLA, which the
    /// caller must preserve rather than guess around.
    pub fn resolve_sla(
        &self,
        ticket: &Ticket,
        device: Option<&Device>,
        policies: &PolicySet,
        sla_type: SlaType,
    ) -> Option<SlaResolution> {
        let criteria = TicketCriteria::from_ticket(ticket, device);
        let policy = resolver::resolve_sla(&policies.sla, &criteria, sla_type)?;
        Some(SlaResolution {
            policy_id: policy.id,
            deadline: sla::deadline(policy, ticket.created_at, ticket.priority),
        })
    }

    /// Apply every matching service policy in specificity order and compose
    /// warranty, chargeability, pricing, and parts rules.
    pub fn resolve_service_policies(
        &self,
        ticket: &Ticket,
        device: Option<&Device>,
        policies: &PolicySet,
        now: DateTime<Utc>,
    ) -> ServiceOutcome {
        let criteria = TicketCriteria::from_ticket(ticket, device);
        let matched = resolver::resolve_service(&policies.service, &criteria, None);

        let mut outcome = ServiceOutcome::default();
        for policy in matched {
            outcome.applied_policies.push(AppliedPolicy {
                policy_id: policy.id,
                policy_type: policy.rules.policy_type().to_string(),
            });
            match &policy.rules {
                ServiceRules::Warranty(rules) => {
                    outcome.warranty_status = warranty_status(rules, device, now);
                }
                ServiceRules::Chargeable(rules) => {
                    apply_chargeable(&mut outcome, rules);
                }
                ServiceRules::Parts(rules) => {
                    outcome.parts_policy = rules.clone();
                }
                ServiceRules::Other { policy_type, .. } => {
                    debug!(policy_id = policy.id, policy_type, "uninterpreted service policy");
                }
            }
        }
        outcome
    }

    /// Apply a lifecycle event. Delegates to the state machine; the ticket
    /// is unmodified when the result is an error.
    pub fn transition(
        &self,
        ticket: &mut Ticket,
        event: TicketEvent,
        now: DateTime<Utc>,
    ) -> Result<TicketStatus, EngineError> {
        state_machine::transition(ticket, event, now)
    }

    /// Snapshot-pure single dispatch decision. Respects the assignment
    /// freeze; committing the returned engineer (with revalidation) is the
    /// coordinator's or caller's job.
    pub fn dispatch<'a>(
        &self,
        ticket: &Ticket,
        pool: &'a [Engineer],
        active_tickets: &[Ticket],
        frozen: bool,
    ) -> Result<&'a Engineer, EngineError> {
        if frozen {
            return Err(EngineError::AssignmentFrozen(ticket.id));
        }
        let filter = PoolFilter {
            organization_id: Some(ticket.organization_id),
            city_id: ticket.city_id,
        };
        dispatch::select_engineer(pool, active_tickets, &filter)
            .ok_or(EngineError::NoEligibleEngineer)
    }

    /// Batch redispatch of at-risk tickets, most endangered first.
    pub fn redispatch(
        &self,
        tickets: &[Ticket],
        pool: &[Engineer],
        filter: &PoolFilter,
        frozen: &std::collections::HashSet<TicketId>,
        now: DateTime<Utc>,
    ) -> Vec<Assignment> {
        dispatch::redispatch(tickets, pool, filter, frozen, &self.redispatch_params(), now)
    }

    /// Advisory redispatch plan for admin review.
    pub fn redispatch_suggestions(
        &self,
        tickets: &[Ticket],
        pool: &[Engineer],
        filter: &PoolFilter,
        frozen: &std::collections::HashSet<TicketId>,
        now: DateTime<Utc>,
    ) -> Vec<Suggestion> {
        dispatch::redispatch_suggestions(
            tickets,
            pool,
            filter,
            frozen,
            &self.redispatch_params(),
            now,
        )
    }

    pub fn compute_breach_risk(&self, ticket: &Ticket, now: DateTime<Utc>) -> f64 {
        sla::breach_risk(ticket, now)
    }

    /// Evaluate a feedback event; at most one escalation per event.
    pub fn evaluate(&mut self, ticket: &Ticket, feedback: &Feedback) -> Option<Escalation> {
        self.trigger.evaluate(ticket, feedback)
    }

    fn redispatch_params(&self) -> RedispatchParams {
        RedispatchParams {
            risk_threshold: self.config.dispatch.risk_threshold,
            max_tickets: self.config.dispatch.max_batch,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Warranty window: purchase date plus N months at 30 days per month. No
/// device or no purchase date means the status stays unknown.
fn warranty_status(
    rules: &WarrantyRules,
    device: Option<&Device>,
    now: DateTime<Utc>,
) -> WarrantyStatus {
    let Some(purchase_date) = device.and_then(|d| d.purchase_date) else {
        return WarrantyStatus::Unknown;
    };
    let warranty_end = purchase_date + Duration::days(rules.warranty_period_months as i64 * 30);
    if now <= warranty_end {
        WarrantyStatus::InWarranty
    } else {
        WarrantyStatus::OutOfWarranty
    }
}

fn apply_chargeable(outcome: &mut ServiceOutcome, rules: &ChargeableRules) {
    let out = "out_of_warranty".to_string();
    let inw = "in_warranty".to_string();
    if outcome.warranty_status == WarrantyStatus::OutOfWarranty && rules.charge_if.contains(&out) {
        outcome.is_chargeable = true;
    } else if outcome.warranty_status == WarrantyStatus::InWarranty && rules.free_if.contains(&inw)
    {
        outcome.is_chargeable = false;
    }
    if !rules.pricing.is_null() {
        outcome.pricing = rules.pricing.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ServicePolicy, SlaPolicy};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn ticket() -> Ticket {
        let mut t = Ticket::new(1, "TKT-0001", 10, "not cooling", now());
        t.city_id = Some(5);
        t.device_id = Some(200);
        t
    }

    fn device(purchased_months_ago: i64) -> Device {
        Device {
            id: 200,
            product_id: Some(77),
            product_category: Some("refrigerator".to_string()),
            purchase_date: Some(now() - Duration::days(purchased_months_ago * 30)),
        }
    }

    fn sla_policy(id: u64, target_hours: i64) -> SlaPolicy {
        SlaPolicy {
            id,
            organization_id: 10,
            product_category: None,
            product_id: None,
            country_id: None,
            state_id: None,
            city_id: None,
            sla_type: SlaType::Resolution,
            target_hours,
            priority_overrides: HashMap::new(),
            business_hours_only: false,
            business_hours: BTreeMap::new(),
            is_active: true,
        }
    }

    fn service_policy(id: u64, policy_type: &str, rules: serde_json::Value) -> ServicePolicy {
        ServicePolicy {
            id,
            organization_id: 10,
            rules: ServiceRules::from_parts(policy_type, rules),
            product_category: None,
            product_id: None,
            country_id: None,
            state_id: None,
            city_id: None,
            is_active: true,
        }
    }

    #[test]
    fn test_resolve_sla_none_when_no_policy() {
        let engine = Engine::default();
        let policies = PolicySet::default();
        assert!(engine
            .resolve_sla(&ticket(), None, &policies, SlaType::Resolution)
            .is_none());
    }

    #[test]
    fn test_resolve_sla_idempotent_on_same_snapshot() {
        let engine = Engine::default();
        let policies = PolicySet::new(vec![sla_policy(1, 24)], vec![]);
        let t = ticket();
        let a = engine
            .resolve_sla(&t, None, &policies, SlaType::Resolution)
            .unwrap();
        let b = engine
            .resolve_sla(&t, None, &policies, SlaType::Resolution)
            .unwrap();
        assert_eq!(a.deadline, b.deadline);
        assert_eq!(a.policy_id, b.policy_id);
    }

    #[test]
    fn test_in_warranty_device_is_not_chargeable() {
        let engine = Engine::default();
        let policies = PolicySet::new(
            vec![],
            vec![
                service_policy(1, "warranty", json!({"warranty_period_months": 12})),
                service_policy(
                    2,
                    "chargeable",
                    json!({"charge_if": ["out_of_warranty"], "free_if": ["in_warranty"]}),
                ),
            ],
        );
        let d = device(6);
        let outcome = engine.resolve_service_policies(&ticket(), Some(&d), &policies, now());
        assert_eq!(outcome.warranty_status, WarrantyStatus::InWarranty);
        assert!(!outcome.is_chargeable);
        assert_eq!(outcome.applied_policies.len(), 2);
    }

    #[test]
    fn test_out_of_warranty_device_is_chargeable_with_pricing() {
        let engine = Engine::default();
        let policies = PolicySet::new(
            vec![],
            vec![
                service_policy(1, "warranty", json!({"warranty_period_months": 12})),
                service_policy(
                    2,
                    "chargeable",
                    json!({
                        "charge_if": ["out_of_warranty"],
                        "pricing": {"visit_fee": 500}
                    }),
                ),
            ],
        );
        let d = device(24);
        let outcome = engine.resolve_service_policies(&ticket(), Some(&d), &policies, now());
        assert_eq!(outcome.warranty_status, WarrantyStatus::OutOfWarranty);
        assert!(outcome.is_chargeable);
        assert_eq!(outcome.pricing["visit_fee"], 500);
    }

    #[test]
    fn test_no_device_means_unknown_warranty() {
        let engine = Engine::default();
        let policies = PolicySet::new(
            vec![],
            vec![service_policy(1, "warranty", json!({}))],
        );
        let outcome = engine.resolve_service_policies(&ticket(), None, &policies, now());
        assert_eq!(outcome.warranty_status, WarrantyStatus::Unknown);
        assert!(!outcome.is_chargeable);
    }

    #[test]
    fn test_parts_policy_passes_through() {
        let engine = Engine::default();
        let policies = PolicySet::new(
            vec![],
            vec![service_policy(
                1,
                "parts",
                json!({"approval_required": true, "max_value": 2000}),
            )],
        );
        let outcome = engine.resolve_service_policies(&ticket(), None, &policies, now());
        assert_eq!(outcome.parts_policy["approval_required"], true);
    }

    #[test]
    fn test_dispatch_respects_freeze() {
        let engine = Engine::default();
        let pool = vec![Engineer {
            id: 1,
            organization_id: 10,
            city_id: Some(5),
            full_name: "Engineer 1".to_string(),
            is_available: true,
            is_active: true,
            skill_level: 1,
        }];
        let t = ticket();
        let err = engine.dispatch(&t, &pool, &[], true).unwrap_err();
        assert!(matches!(err, EngineError::AssignmentFrozen(1)));

        let picked = engine.dispatch(&t, &pool, &[], false).unwrap();
        assert_eq!(picked.id, 1);
    }
}
