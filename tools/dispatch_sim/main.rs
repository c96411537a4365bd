//! Dispatch Simulator - Deterministic redispatch scenarios against a
//! generated fleet.
//!
//! Usage:
//!   dispatch_sim --engineers 5 --tickets 20 --scenario steady
//!   dispatch_sim --engineers 3 --tickets 30 --scenario overload
//!   dispatch_sim --engineers 5 --tickets 20 --scenario frozen
//!
//! Outputs machine-readable JSON reports to ./artifacts/simulations/

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use fieldserve_core::dispatch::PoolFilter;
use fieldserve_core::engine::Engine;
use fieldserve_core::types::{Engineer, Ticket, TicketId, TicketPriority};

const ORG: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimulationReport {
    scenario: String,
    engineer_count: usize,
    ticket_count: usize,
    at_risk_tickets: usize,
    frozen_tickets: usize,
    assignments_made: usize,
    max_assignments_per_engineer: usize,
    min_assignments_per_engineer: usize,
    mean_risk: f64,
    success: bool,
    notes: String,
}

fn sim_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

fn generate_fleet(count: usize) -> Vec<Engineer> {
    (1..=count as u64)
        .map(|id| Engineer {
            id,
            organization_id: ORG,
            city_id: None,
            full_name: format!("Sim Engineer {id:03}"),
            is_available: true,
            is_active: true,
            skill_level: 3,
        })
        .collect()
}

/// Deterministic ticket mix: every third ticket urgent, deadlines spread
/// from 2 to 60 hours out so risk varies across the batch.
fn generate_tickets(count: usize, now: DateTime<Utc>) -> Vec<Ticket> {
    (1..=count as u64)
        .map(|id| {
            let mut t = Ticket::new(
                id,
                format!("SIM-{id:04}"),
                ORG,
                "simulated fault",
                now - Duration::hours(6),
            );
            if id % 3 == 0 {
                t.priority = TicketPriority::Urgent;
            }
            t.sla_deadline = Some(now + Duration::hours(2 + (id as i64 * 7) % 59));
            t
        })
        .collect()
}

fn run_scenario(
    scenario: &str,
    engineers: usize,
    tickets: usize,
    frozen_ids: HashSet<TicketId>,
) -> SimulationReport {
    let now = sim_clock();
    let engine = Engine::default();
    let fleet = generate_fleet(engineers);
    let backlog = generate_tickets(tickets, now);

    let at_risk = backlog
        .iter()
        .filter(|t| {
            engine.compute_breach_risk(t, now) >= engine.config().dispatch.risk_threshold
        })
        .count();

    let filter = PoolFilter {
        organization_id: Some(ORG),
        city_id: None,
    };
    let assignments = engine.redispatch(&backlog, &fleet, &filter, &frozen_ids, now);

    let per_engineer: Vec<usize> = fleet
        .iter()
        .map(|e| assignments.iter().filter(|a| a.engineer_id == e.id).count())
        .collect();
    let max_load = per_engineer.iter().copied().max().unwrap_or(0);
    let min_load = per_engineer.iter().copied().min().unwrap_or(0);
    let mean_risk = if assignments.is_empty() {
        0.0
    } else {
        assignments.iter().map(|a| a.risk).sum::<f64>() / assignments.len() as f64
    };

    // The batch is balanced when no engineer is more than one assignment
    // ahead of the lightest, and no frozen ticket slipped through.
    let balanced = max_load - min_load <= 1;
    let frozen_respected = assignments.iter().all(|a| !frozen_ids.contains(&a.ticket_id));

    SimulationReport {
        scenario: scenario.to_string(),
        engineer_count: engineers,
        ticket_count: tickets,
        at_risk_tickets: at_risk,
        frozen_tickets: frozen_ids.len(),
        assignments_made: assignments.len(),
        max_assignments_per_engineer: max_load,
        min_assignments_per_engineer: min_load,
        mean_risk,
        success: balanced && frozen_respected,
        notes: format!(
            "{} of {} tickets at or above the risk threshold; {} assigned across {} engineers (loads {}-{}).",
            at_risk, tickets, assignments.len(), engineers, min_load, max_load
        ),
    }
}

fn simulate_steady(engineers: usize, tickets: usize) -> SimulationReport {
    run_scenario("steady", engineers, tickets, HashSet::new())
}

fn simulate_overload(engineers: usize, tickets: usize) -> SimulationReport {
    // Overload keeps the backlog but caps the fleet at two engineers, so
    // the batch cap has to bound the damage.
    run_scenario("overload", engineers.min(2), tickets, HashSet::new())
}

fn simulate_frozen(engineers: usize, tickets: usize) -> SimulationReport {
    // Freeze every fifth ticket; none of them may appear in the output.
    let frozen: HashSet<TicketId> = (1..=tickets as u64).filter(|id| id % 5 == 0).collect();
    run_scenario("frozen", engineers, tickets, frozen)
}

// ============================================================================
// MAIN
// ============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut engineers = 5;
    let mut tickets = 20;
    let mut scenario = "steady".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--engineers" => {
                if i + 1 < args.len() {
                    engineers = args[i + 1].parse().unwrap_or(5);
                    i += 2;
                } else {
                    eprintln!("Error: --engineers requires a value");
                    std::process::exit(1);
                }
            }
            "--tickets" => {
                if i + 1 < args.len() {
                    tickets = args[i + 1].parse().unwrap_or(20);
                    i += 2;
                } else {
                    eprintln!("Error: --tickets requires a value");
                    std::process::exit(1);
                }
            }
            "--scenario" => {
                if i + 1 < args.len() {
                    scenario = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("Error: --scenario requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("Dispatch Simulator");
                println!();
                println!("Usage:");
                println!("  dispatch_sim --engineers <N> --tickets <N> --scenario <scenario>");
                println!();
                println!("Options:");
                println!("  --engineers <N>       Fleet size (1-50, default: 5)");
                println!("  --tickets <N>         Backlog size (default: 20)");
                println!("  --scenario <scenario> Scenario: steady, overload, frozen");
                std::process::exit(0);
            }
            _ => {
                eprintln!("Error: Unknown argument: {}", args[i]);
                eprintln!("Run with --help for usage");
                std::process::exit(1);
            }
        }
    }

    if !(1..=50).contains(&engineers) {
        eprintln!("Error: engineers must be between 1 and 50");
        std::process::exit(1);
    }

    let report = match scenario.as_str() {
        "steady" => simulate_steady(engineers, tickets),
        "overload" => simulate_overload(engineers, tickets),
        "frozen" => simulate_frozen(engineers, tickets),
        _ => {
            eprintln!("Error: Unknown scenario: {}", scenario);
            eprintln!("Valid scenarios: steady, overload, frozen");
            std::process::exit(1);
        }
    };

    let output_dir = PathBuf::from("./artifacts/simulations");
    fs::create_dir_all(&output_dir).unwrap();
    let output_file = output_dir.join(format!("{}.json", scenario));
    let json = serde_json::to_string_pretty(&report).unwrap();
    fs::write(&output_file, json).unwrap();

    println!("\n=== Dispatch Simulation: {} ===\n", scenario);
    println!("Engineers:            {}", report.engineer_count);
    println!("Tickets:              {}", report.ticket_count);
    println!("At-risk tickets:      {}", report.at_risk_tickets);
    println!("Frozen tickets:       {}", report.frozen_tickets);
    println!("Assignments made:     {}", report.assignments_made);
    println!(
        "Load spread:          {}-{}",
        report.min_assignments_per_engineer, report.max_assignments_per_engineer
    );
    println!("Mean batch risk:      {:.2}", report.mean_risk);
    println!("\nNotes: {}", report.notes);
    println!("\nReport saved to: {}\n", output_file.display());

    if report.success {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
