//! Shared domain types for the Pawflow automation engine.
//!
//! Flows, runs, jobs, run logs, idempotency records, tenant plans and the
//! engine configuration, plus the repository error type used by the ports in
//! `pawflow-core`.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod flow;
pub mod job;
pub mod ledger;
pub mod plan;
pub mod run;
