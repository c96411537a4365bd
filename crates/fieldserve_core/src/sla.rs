//! SLA clock: deadline computation and breach risk.
//!
//! Both functions are pure over explicit inputs (`created_at`, `now`) and are
//! re-evaluated on every read. A stored `sla_breach_risk` is only a listing
//! cache, never an input to a decision.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::policy::SlaPolicy;
use crate::types::{Ticket, TicketPriority};

/// Turns a target in hours into a concrete deadline. `CalendarHours` is the
/// 24x7 default; a business-hours implementation can skip nights and
/// weekends using the policy's `business_hours` table.
pub trait DeadlineCalendar {
    fn add_hours(&self, start: DateTime<Utc>, hours: i64) -> DateTime<Utc>;
}

/// Plain calendar arithmetic. Used even for `business_hours_only` policies
/// until a business calendar is wired in.
pub struct CalendarHours;

impl DeadlineCalendar for CalendarHours {
    fn add_hours(&self, start: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
        start + Duration::hours(hours)
    }
}

/// Compute the deadline for a resolved policy. The per-priority override
/// replaces `target_hours` when present.
pub fn deadline(
    policy: &SlaPolicy,
    created_at: DateTime<Utc>,
    priority: TicketPriority,
) -> DateTime<Utc> {
    deadline_with(policy, created_at, priority, &CalendarHours)
}

pub fn deadline_with(
    policy: &SlaPolicy,
    created_at: DateTime<Utc>,
    priority: TicketPriority,
    calendar: &dyn DeadlineCalendar,
) -> DateTime<Utc> {
    let hours = policy
        .priority_overrides
        .get(&priority)
        .copied()
        .unwrap_or(policy.target_hours);

    if policy.business_hours_only && !policy.business_hours.is_empty() {
        debug!(
            policy_id = policy.id,
            "business_hours_only policy, deadline computed through calendar extension"
        );
    }
    calendar.add_hours(created_at, hours)
}

/// Heuristic breach risk in [0, 0.99], monotonically non-decreasing as `now`
/// approaches the deadline. Base 0.10; +0.20 for high/urgent priority; +0.20
/// while no engineer has started; +0.40 inside the final 4 hours, else +0.20
/// inside the final 24. Rounded to two decimals.
pub fn breach_risk(ticket: &Ticket, now: DateTime<Utc>) -> f64 {
    let mut risk: f64 = 0.10;
    if ticket.priority.is_expedited() {
        risk += 0.20;
    }
    if ticket.status.is_unstarted() {
        risk += 0.20;
    }
    if let Some(deadline) = ticket.sla_deadline {
        let remaining_hours = (deadline - now).num_seconds() as f64 / 3600.0;
        if remaining_hours <= 4.0 {
            risk += 0.40;
        } else if remaining_hours <= 24.0 {
            risk += 0.20;
        }
    }
    (risk.min(0.99) * 100.0).round() / 100.0
}

/// Human-readable factors behind `breach_risk`, for admin dashboards.
pub fn risk_reasons(ticket: &Ticket, now: DateTime<Utc>) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(deadline) = ticket.sla_deadline {
        let remaining = (deadline - now).num_seconds() as f64 / 3600.0;
        if remaining <= 4.0 {
            reasons.push("SLA deadline is within 4 hours".to_string());
        } else if remaining <= 24.0 {
            reasons.push("SLA deadline is within 24 hours".to_string());
        }
    }
    if ticket.priority.is_expedited() {
        reasons.push("High/urgent priority".to_string());
    }
    if ticket.status.is_unstarted() {
        reasons.push("Ticket not started yet".to_string());
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SlaType;
    use crate::types::TicketStatus;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashMap};

    fn policy(target_hours: i64) -> SlaPolicy {
        SlaPolicy {
            id: 1,
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

    fn ticket_at(created: DateTime<Utc>) -> Ticket {
        Ticket::new(1, "TKT-0001", 10, "no power", created)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_deadline_uses_target_hours() {
        let d = deadline(&policy(24), t0(), TicketPriority::Medium);
        assert_eq!(d, t0() + Duration::hours(24));
    }

    #[test]
    fn test_priority_override_replaces_target() {
        let mut p = policy(24);
        p.priority_overrides.insert(TicketPriority::Urgent, 4);
        assert_eq!(
            deadline(&p, t0(), TicketPriority::Urgent),
            t0() + Duration::hours(4)
        );
        // Other priorities keep the base target.
        assert_eq!(
            deadline(&p, t0(), TicketPriority::Low),
            t0() + Duration::hours(24)
        );
    }

    #[test]
    fn test_deadline_is_idempotent() {
        let p = policy(24);
        let a = deadline(&p, t0(), TicketPriority::High);
        let b = deadline(&p, t0(), TicketPriority::High);
        assert_eq!(a, b);
    }

    #[test]
    fn test_breach_risk_base_case() {
        let mut t = ticket_at(t0());
        t.status = TicketStatus::InProgress;
        // No deadline, medium priority, started: base only.
        assert_abs_diff_eq!(breach_risk(&t, t0()), 0.10);
    }

    #[test]
    fn test_breach_risk_components_stack() {
        let mut t = ticket_at(t0());
        t.priority = TicketPriority::Urgent;
        t.sla_deadline = Some(t0() + Duration::hours(2));
        // 0.10 + 0.20 (urgent) + 0.20 (created) + 0.40 (<=4h) = 0.90
        assert_abs_diff_eq!(breach_risk(&t, t0()), 0.90);
    }

    #[test]
    fn test_breach_risk_monotonic_toward_deadline() {
        let mut t = ticket_at(t0());
        t.sla_deadline = Some(t0() + Duration::hours(48));
        let mut prev = 0.0;
        for h in 0..48 {
            let r = breach_risk(&t, t0() + Duration::hours(h));
            assert!(r >= prev, "risk decreased at {}h: {} < {}", h, r, prev);
            assert!((0.0..=0.99).contains(&r));
            prev = r;
        }
    }

    #[test]
    fn test_breach_risk_clamped_past_deadline() {
        let mut t = ticket_at(t0());
        t.priority = TicketPriority::Urgent;
        t.sla_deadline = Some(t0());
        let r = breach_risk(&t, t0() + Duration::hours(100));
        assert!(r <= 0.99);
        assert_abs_diff_eq!(r, 0.90);
    }

    #[test]
    fn test_risk_reasons_match_factors() {
        let mut t = ticket_at(t0());
        t.priority = TicketPriority::High;
        t.sla_deadline = Some(t0() + Duration::hours(12));
        let reasons = risk_reasons(&t, t0());
        assert!(reasons.iter().any(|r| r.contains("24 hours")));
        assert!(reasons.iter().any(|r| r.contains("priority")));
        assert!(reasons.iter().any(|r| r.contains("not started")));
    }
}
