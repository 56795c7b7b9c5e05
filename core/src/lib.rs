//! Complaint SLA core: deadline engine, escalation ledger, workflow guard,
//! and the periodic escalation scheduler.

pub mod clock;
pub mod complaint;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod sla_engine;
pub mod store;
pub mod types;
pub mod workflow;
