//! Execution engine and repository trait definitions for Pawflow.
//!
//! This crate defines the "ports" (repository and side-effect traits) that the
//! infrastructure layer implements, and the engine built on top of them. It
//! depends only on `pawflow-types` -- never on `pawflow-infra` or any
//! database/IO crate.

pub mod flow;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;
