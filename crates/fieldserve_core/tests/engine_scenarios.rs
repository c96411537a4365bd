//! End-to-end engine scenarios.
//!
//! Exercises the full path from policy resolution through dispatch, the
//! lifecycle state machine, and feedback escalation, with one realistic
//! organization snapshot per scenario.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;

use fieldserve_core::dispatch::PoolFilter;
use fieldserve_core::engine::Engine;
use fieldserve_core::error::EngineError;
use fieldserve_core::policy::{PolicySet, ServicePolicy, ServiceRules, SlaPolicy, SlaType};
use fieldserve_core::state_machine::TicketEvent;
use fieldserve_core::types::{
    Engineer, Feedback, Ticket, TicketPriority, TicketStatus,
};

const ORG: u64 = 1;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

fn make_ticket(id: u64) -> Ticket {
    Ticket::new(id, format!("TKT-{id:04}"), ORG, "screen flickers", t0())
}

fn make_engineer(id: u64, city_id: Option<u64>) -> Engineer {
    Engineer {
        id,
        organization_id: ORG,
        city_id,
        full_name: format!("Engineer {id}"),
        is_available: true,
        is_active: true,
        skill_level: 3,
    }
}

fn sla_policy(id: u64, target_hours: i64) -> SlaPolicy {
    SlaPolicy {
        id,
        organization_id: ORG,
        product_category: None,
        product_id: None,
        country_id: None,
        state_id: None,
        city_id: None,
        sla_type: SlaType::Resolution,
        target_hours,
        priority_overrides: Default::default(),
        business_hours_only: false,
        business_hours: Default::default(),
        is_active: true,
    }
}

fn service_policy(id: u64, rules: ServiceRules) -> ServicePolicy {
    ServicePolicy {
        id,
        organization_id: ORG,
        rules,
        product_category: None,
        product_id: None,
        country_id: None,
        state_id: None,
        city_id: None,
        is_active: true,
    }
}

// ============================================================================
// Policy resolution
// ============================================================================

#[test]
fn city_policy_beats_global_for_its_city_only() {
    let global = sla_policy(1, 24);
    let mut city = sla_policy(2, 8);
    city.city_id = Some(5);
    let policies = PolicySet::new(vec![global, city], vec![]);
    let engine = Engine::default();

    let mut in_city = make_ticket(100);
    in_city.city_id = Some(5);
    let resolved = engine
        .resolve_sla(&in_city, None, &policies, SlaType::Resolution)
        .unwrap();
    assert_eq!(resolved.policy_id, 2);
    assert_eq!(resolved.deadline, t0() + Duration::hours(8));

    let mut elsewhere = make_ticket(101);
    elsewhere.city_id = Some(9);
    let resolved = engine
        .resolve_sla(&elsewhere, None, &policies, SlaType::Resolution)
        .unwrap();
    assert_eq!(resolved.policy_id, 1);
    assert_eq!(resolved.deadline, t0() + Duration::hours(24));
}

#[test]
fn resolving_twice_yields_the_same_answer() {
    let policies = PolicySet::new(vec![sla_policy(1, 24)], vec![]);
    let engine = Engine::default();
    let ticket = make_ticket(100);

    let first = engine
        .resolve_sla(&ticket, None, &policies, SlaType::Resolution)
        .unwrap();
    let second = engine
        .resolve_sla(&ticket, None, &policies, SlaType::Resolution)
        .unwrap();
    assert_eq!(first.policy_id, second.policy_id);
    assert_eq!(first.deadline, second.deadline);
}

#[test]
fn no_matching_policy_means_no_deadline() {
    let engine = Engine::default();
    let ticket = make_ticket(100);
    let empty = PolicySet::new(vec![], vec![]);
    assert!(engine
        .resolve_sla(&ticket, None, &empty, SlaType::Resolution)
        .is_none());
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn dispatch_picks_the_least_loaded_engineer() {
    let pool = vec![make_engineer(1, None), make_engineer(2, None), make_engineer(3, None)];

    // E1 carries three active tickets, E2 one, E3 none.
    let mut active = Vec::new();
    for (i, owner) in [(1u64, 1u64), (2, 1), (3, 1), (4, 2)] {
        let mut t = make_ticket(200 + i);
        t.status = TicketStatus::Assigned;
        t.assigned_engineer_id = Some(owner);
        active.push(t);
    }

    let engine = Engine::default();
    let ticket = make_ticket(300);
    let chosen = engine.dispatch(&ticket, &pool, &active, false).unwrap();
    assert_eq!(chosen.id, 3);
}

#[test]
fn dispatch_respects_the_assignment_freeze() {
    let pool = vec![make_engineer(1, None)];
    let engine = Engine::default();
    let ticket = make_ticket(300);
    let err = engine.dispatch(&ticket, &pool, &[], true).unwrap_err();
    assert!(matches!(err, EngineError::AssignmentFrozen(300)));
}

#[test]
fn redispatch_batch_stays_balanced() {
    // 9 at-risk tickets over 3 idle engineers: nobody ends up above
    // ceil(9 / 3) = 3 assignments.
    let now = t0();
    let pool: Vec<Engineer> = (1..=3).map(|id| make_engineer(id, None)).collect();
    let tickets: Vec<Ticket> = (1..=9u64)
        .map(|i| {
            let mut t = make_ticket(400 + i);
            t.priority = TicketPriority::Urgent;
            t.sla_deadline = Some(now + Duration::hours(2));
            t
        })
        .collect();

    let engine = Engine::default();
    let filter = PoolFilter { organization_id: Some(ORG), city_id: None };
    let assignments = engine.redispatch(&tickets, &pool, &filter, &HashSet::new(), now);

    assert_eq!(assignments.len(), 9);
    for engineer_id in 1..=3u64 {
        let count = assignments.iter().filter(|a| a.engineer_id == engineer_id).count();
        assert_eq!(count, 3);
    }
}

#[test]
fn redispatch_skips_frozen_and_low_risk_tickets() {
    let now = t0();
    let pool = vec![make_engineer(1, None)];

    let mut urgent = make_ticket(500);
    urgent.priority = TicketPriority::Urgent;
    urgent.sla_deadline = Some(now + Duration::hours(2));

    let mut frozen_ticket = urgent.clone();
    frozen_ticket.id = 501;

    let mut relaxed = make_ticket(502);
    relaxed.sla_deadline = Some(now + Duration::hours(200));

    let frozen: HashSet<u64> = [501].into_iter().collect();
    let engine = Engine::default();
    let filter = PoolFilter { organization_id: Some(ORG), city_id: None };
    let assignments = engine.redispatch(
        &[urgent, frozen_ticket, relaxed],
        &pool,
        &filter,
        &frozen,
        now,
    );

    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].ticket_id, 500);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn created_ticket_cannot_be_resolved_directly() {
    let engine = Engine::default();
    let mut ticket = make_ticket(600);
    let before = ticket.clone();

    let err = engine
        .transition(
            &mut ticket,
            TicketEvent::Resolve {
                engineer_id: 1,
                notes: "replaced panel".into(),
                parts_used: vec![],
                photos: vec![],
            },
            t0(),
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidTransition { from: TicketStatus::Created, .. }));
    // Failed transitions leave the ticket untouched.
    assert_eq!(ticket.status, before.status);
    assert_eq!(ticket.resolution_notes, before.resolution_notes);
}

#[test]
fn full_lifecycle_created_to_closed() {
    let engine = Engine::default();
    let now = t0();
    let mut ticket = make_ticket(601);

    engine
        .transition(&mut ticket, TicketEvent::Assign { engineer_id: 7, assigned_by: Some(99) }, now)
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Assigned);
    assert_eq!(ticket.assigned_engineer_id, Some(7));
    assert_eq!(ticket.assigned_at, Some(now));

    engine
        .transition(&mut ticket, TicketEvent::Accept { engineer_id: 7 }, now)
        .unwrap();

    let start = now + Duration::hours(1);
    engine
        .transition(
            &mut ticket,
            TicketEvent::Start { engineer_id: 7, eta_start: Some(start), eta_end: None },
            start,
        )
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::InProgress);
    assert_eq!(ticket.started_at, Some(start));

    let end = start + Duration::hours(2);
    engine
        .transition(
            &mut ticket,
            TicketEvent::Resolve {
                engineer_id: 7,
                notes: "replaced panel".into(),
                parts_used: vec![],
                photos: vec!["after.jpg".into()],
            },
            end,
        )
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Resolved);
    assert_eq!(ticket.resolved_at, Some(end));

    engine.transition(&mut ticket, TicketEvent::Close, end).unwrap();
    assert_eq!(ticket.status, TicketStatus::Closed);
    assert!(ticket.status.is_terminal());
    assert!(ticket.assignment_consistent());
}

#[test]
fn wrong_engineer_cannot_start_someone_elses_ticket() {
    let engine = Engine::default();
    let mut ticket = make_ticket(602);
    engine
        .transition(&mut ticket, TicketEvent::Assign { engineer_id: 7, assigned_by: None }, t0())
        .unwrap();

    let err = engine
        .transition(
            &mut ticket,
            TicketEvent::Start { engineer_id: 8, eta_start: None, eta_end: None },
            t0(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::WrongEngineer { expected: Some(7), actual: 8 }));
    assert_eq!(ticket.status, TicketStatus::Assigned);
}

#[test]
fn escalation_overlay_restores_the_prior_status() {
    let engine = Engine::default();
    let mut ticket = make_ticket(603);
    engine
        .transition(&mut ticket, TicketEvent::Assign { engineer_id: 7, assigned_by: None }, t0())
        .unwrap();
    engine
        .transition(
            &mut ticket,
            TicketEvent::Start { engineer_id: 7, eta_start: None, eta_end: None },
            t0(),
        )
        .unwrap();

    engine.transition(&mut ticket, TicketEvent::Escalate, t0()).unwrap();
    assert_eq!(ticket.status, TicketStatus::Escalated);
    assert!(ticket.assignment_consistent());

    engine.transition(&mut ticket, TicketEvent::ClearEscalation, t0()).unwrap();
    assert_eq!(ticket.status, TicketStatus::InProgress);
}

// ============================================================================
// Breach risk
// ============================================================================

#[test]
fn breach_risk_is_bounded_and_non_decreasing() {
    let engine = Engine::default();
    let mut ticket = make_ticket(700);
    ticket.priority = TicketPriority::Urgent;
    ticket.sla_deadline = Some(t0() + Duration::hours(48));

    let mut previous = 0.0;
    for hour in 0..=48 {
        let risk = engine.compute_breach_risk(&ticket, t0() + Duration::hours(hour));
        assert!((0.0..=0.99).contains(&risk), "risk {risk} out of bounds at hour {hour}");
        assert!(risk >= previous, "risk decreased at hour {hour}");
        previous = risk;
    }
    // Unstarted urgent ticket inside the final 4 hours hits the cap.
    assert!((previous - 0.90).abs() < 1e-9);
}

// ============================================================================
// Feedback escalation
// ============================================================================

fn feedback(rating: u8, at: DateTime<Utc>) -> Feedback {
    Feedback {
        ticket_id: 800,
        rating: Some(rating),
        feedback: Some("engineer never showed".into()),
        sentiment_score: None,
        dispute_tags: vec![],
        submitted_by: Some(42),
        submitted_at: at,
    }
}

#[test]
fn bad_rating_escalates_exactly_once_per_event() {
    let mut engine = Engine::default();
    let mut ticket = make_ticket(800);
    ticket.city_id = Some(5);

    let event = feedback(1, t0());
    let escalation = engine.evaluate(&ticket, &event).expect("rating 1 must escalate");
    assert_eq!(escalation.ticket_id, 800);

    // Replaying the same feedback event is a no-op.
    assert!(engine.evaluate(&ticket, &event).is_none());

    // A genuinely new event for the same ticket escalates again.
    let later = feedback(2, t0() + Duration::hours(3));
    assert!(engine.evaluate(&ticket, &later).is_some());
}

#[test]
fn positive_feedback_never_escalates() {
    let mut engine = Engine::default();
    let ticket = make_ticket(801);
    assert!(engine.evaluate(&ticket, &feedback(5, t0())).is_none());
}

// ============================================================================
// Service policies
// ============================================================================

#[test]
fn service_policies_compose_in_specificity_order() {
    use fieldserve_core::policy::{ChargeableRules, WarrantyRules};
    use fieldserve_core::types::{Device, WarrantyStatus};

    let warranty = service_policy(
        1,
        ServiceRules::Warranty(WarrantyRules { warranty_period_months: 12 }),
    );
    let chargeable = service_policy(
        2,
        ServiceRules::Chargeable(ChargeableRules {
            charge_if: vec!["out_of_warranty".into()],
            free_if: vec!["in_warranty".into()],
            pricing: serde_json::json!({"diagnostic_fee": 49}),
        }),
    );
    let policies = PolicySet::new(vec![], vec![warranty, chargeable]);

    let device = Device {
        id: 10,
        product_id: None,
        product_category: None,
        // Two years old: out of a 12-month warranty.
        purchase_date: Some(t0() - Duration::days(730)),
    };

    let engine = Engine::default();
    let mut ticket = make_ticket(900);
    ticket.device_id = Some(10);

    let outcome = engine.resolve_service_policies(&ticket, Some(&device), &policies, t0());
    assert_eq!(outcome.warranty_status, WarrantyStatus::OutOfWarranty);
    assert!(outcome.is_chargeable);
    assert_eq!(outcome.pricing["diagnostic_fee"], 49);
    assert_eq!(outcome.applied_policies.len(), 2);
}
