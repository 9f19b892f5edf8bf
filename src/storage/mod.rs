//! # Storage and Persistence
//!
//! SQLite-backed implementations of the secret store and the audit sink.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool};
pub use repositories::{SqlxAuditSink, SqlxSecretStore};
