//! # Repositories
//!
//! sqlx implementations of the persistence seams used by the services.

pub mod audit_log;
pub mod secret;

pub use audit_log::SqlxAuditSink;
pub use secret::SqlxSecretStore;
