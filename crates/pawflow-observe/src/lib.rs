//! Observability setup for Pawflow processes.

pub mod tracing_setup;
