//! Fieldserve Core - Ticket dispatch and SLA policy engine.
//!
//! Resolves scoped SLA and service policies, computes deadlines and breach
//! risk, drives the ticket lifecycle state machine, assigns engineers from
//! availability pools, and escalates on negative feedback.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod policy;
pub mod resolver;
pub mod sla;
pub mod state_machine;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Engine, ServiceOutcome, SlaResolution};
pub use error::EngineError;
pub use types::*;
