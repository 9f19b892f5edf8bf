//! Audit log repository
//!
//! Persists [`AuditEntry`] rows to the `audit_log` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::audit::{AuditEntry, AuditError, AuditSink};
use crate::storage::DbPool;

#[derive(Debug, Clone, FromRow)]
struct AuditRow {
    event_type: String,
    actor_id: Option<String>,
    module: String,
    description: String,
    affected_data: String,
    origin_ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            affected_data: serde_json::from_str(&row.affected_data)?,
            event_type: row.event_type,
            actor_id: row.actor_id,
            module: row.module,
            description: row.description,
            origin_ip: row.origin_ip,
            user_agent: row.user_agent,
            occurred_at: row.created_at,
        })
    }
}

/// Audit sink writing to the `audit_log` table.
#[derive(Debug, Clone)]
pub struct SqlxAuditSink {
    pool: DbPool,
}

impl SqlxAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recent entries, newest first. `event_type` narrows the result.
    pub async fn recent(
        &self,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT event_type, actor_id, module, description, affected_data, origin_ip, user_agent, created_at \
             FROM audit_log WHERE (?1 IS NULL OR event_type = ?1) ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(event_type)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[async_trait]
impl AuditSink for SqlxAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let affected_data = serde_json::to_string(&entry.affected_data)?;

        sqlx::query(
            "INSERT INTO audit_log (id, event_type, actor_id, module, description, affected_data, origin_ip, user_agent, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&entry.event_type)
        .bind(&entry.actor_id)
        .bind(&entry.module)
        .bind(&entry.description)
        .bind(affected_data)
        .bind(&entry.origin_ip)
        .bind(&entry.user_agent)
        .bind(entry.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, event_type = %entry.event_type, "Failed to write audit event");
            AuditError::Storage(e.to_string())
        })?;

        Ok(())
    }
}
