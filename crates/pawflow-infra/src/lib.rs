//! Infrastructure layer for Pawflow.
//!
//! Implements the ports defined in `pawflow-core`: SQLite repositories and
//! subject source, the engine config loader, and mail senders.

pub mod config;
pub mod mail;
pub mod sqlite;
