//! Flow execution engine.
//!
//! Provides:
//! - Expression evaluation (`expression`, `logic`) and ISO-8601 delays (`duration`)
//! - The idempotency ledger and action dispatch with plan allowlists
//! - The step-chain executor, backoff controller and worker pool
//! - Enrollment, schedule triggers and the trigger scheduler

pub mod dispatcher;
pub mod duration;
pub mod enrollment;
pub mod error;
pub mod executor;
pub mod expression;
pub mod handlers;
pub mod idempotency;
pub mod logic;
pub mod mail;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod trigger;
pub mod worker;
