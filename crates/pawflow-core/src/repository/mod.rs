//! Persistence ports implemented by `pawflow-infra`.

pub mod engine;
pub mod flow;
