//! # Audit Trail
//!
//! Every create/rotate/sign/verify outcome, including failures, is described
//! by an [`AuditEntry`] and handed to an [`AuditSink`]. Services never talk to
//! a sink directly; they go through [`AuditTrail`], which retries and surfaces
//! submission failures without touching the caller's own result.
//!
//! Entries never carry secret values, passphrases or key material.

mod trail;

pub use trail::AuditTrail;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

/// Event type names written to the audit log.
pub mod events {
    pub const SECRET_CREATE: &str = "secrets.create";
    pub const SECRET_ROTATE: &str = "secrets.rotate";
    pub const SECRET_LOAD: &str = "secrets.load";
    pub const SECRET_DEACTIVATE: &str = "secrets.deactivate";
    pub const SIGNATURE_SIGN: &str = "signature.sign";
    pub const SIGNATURE_VERIFY: &str = "signature.verify";
    pub const ENCRYPTION_INTEGRITY: &str = "encryption.integrity";
}

/// Module names recorded alongside each event.
pub mod modules {
    pub const SECRETS: &str = "secrets";
    pub const SIGNATURE: &str = "signature";
    pub const ENCRYPTION: &str = "encryption";
}

/// Error returned by a sink that could not persist an entry.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit storage failed: {0}")]
    Storage(String),

    #[error("Audit entry could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: String,
    pub actor_id: Option<String>,
    pub module: String,
    pub description: String,
    pub affected_data: serde_json::Value,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        event_type: impl Into<String>,
        module: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor_id: None,
            module: module.into(),
            description: description.into(),
            affected_data: serde_json::Value::Object(Default::default()),
            origin_ip: None,
            user_agent: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Option<impl Into<String>>) -> Self {
        self.actor_id = actor_id.map(Into::into);
        self
    }

    pub fn with_data(mut self, affected_data: serde_json::Value) -> Self {
        self.affected_data = affected_data;
        self
    }

    pub fn with_origin(mut self, origin_ip: Option<String>, user_agent: Option<String>) -> Self {
        self.origin_ip = origin_ip;
        self.user_agent = user_agent;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Keeps entries in memory. Used by tests and dry-run CLI invocations.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn entries_of(&self, event_type: &str) -> Vec<AuditEntry> {
        self.entries().into_iter().filter(|e| e.event_type == event_type).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(entry);
        Ok(())
    }
}
