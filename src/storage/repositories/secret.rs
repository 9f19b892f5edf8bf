//! Secret repository backing [`SecretStore`]
//!
//! Rows hold ciphertext, IV and GCM tag. Rotation updates the active row and
//! appends to `secret_rotation_history` inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::store::SecretStore;
use crate::secrets::types::{
    NewSecretRecord, RotationHistoryEntry, SecretRecord, SecretRotation, SecretType,
};
use crate::storage::DbPool;

const SECRET_COLUMNS: &str = "id, name, secret_type, description, version, active, ciphertext, iv, auth_tag, created_by, created_at, rotated_at, expires_at";

/// Database row structure for secrets
#[derive(Debug, Clone, FromRow)]
struct SecretRow {
    id: String,
    name: String,
    secret_type: String,
    description: Option<String>,
    version: i64,
    active: bool,
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
    auth_tag: Vec<u8>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SecretRow> for SecretRecord {
    type Error = SecretsError;

    fn try_from(row: SecretRow) -> Result<Self> {
        Ok(SecretRecord {
            secret_type: row.secret_type.parse::<SecretType>()?,
            id: row.id,
            name: row.name,
            description: row.description,
            version: row.version,
            active: row.active,
            ciphertext: row.ciphertext,
            iv: row.iv,
            auth_tag: row.auth_tag,
            created_by: row.created_by,
            created_at: row.created_at,
            rotated_at: row.rotated_at,
            expires_at: row.expires_at,
        })
    }
}

/// Database row structure for rotation history
#[derive(Debug, Clone, FromRow)]
struct RotationRow {
    id: String,
    secret_id: String,
    secret_name: String,
    old_version: i64,
    new_version: i64,
    reason: String,
    actor: String,
    origin_ip: Option<String>,
    user_agent: Option<String>,
    rotated_at: DateTime<Utc>,
}

impl From<RotationRow> for RotationHistoryEntry {
    fn from(row: RotationRow) -> Self {
        Self {
            id: row.id,
            secret_id: row.secret_id,
            secret_name: row.secret_name,
            old_version: row.old_version,
            new_version: row.new_version,
            reason: row.reason,
            actor: row.actor,
            origin_ip: row.origin_ip,
            user_agent: row.user_agent,
            rotated_at: row.rotated_at,
        }
    }
}

/// SQLite-backed secret store
#[derive(Debug, Clone)]
pub struct SqlxSecretStore {
    pool: DbPool,
}

impl SqlxSecretStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn fetch_by_id(&self, id: &str) -> Result<SecretRecord> {
        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE id = ?",
            SECRET_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SecretsError::database(e, format!("Failed to read secret with ID '{}'", id)))?;
        row.try_into()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl SecretStore for SqlxSecretStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| SecretsError::store_unavailable(e.to_string()))
    }

    #[instrument(skip(self), name = "db_fetch_active_secrets")]
    async fn fetch_active(&self) -> Result<Vec<SecretRecord>> {
        let rows = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE active = 1 ORDER BY name",
            SECRET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list active secrets");
            SecretsError::database(e, "Failed to list active secrets")
        })?;

        rows.into_iter().map(SecretRecord::try_from).collect()
    }

    #[instrument(skip(self), fields(secret_name = %name), name = "db_get_secret_by_name")]
    async fn fetch_active_by_name(&self, name: &str) -> Result<Option<SecretRecord>> {
        let row = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE name = ? AND active = 1",
            SECRET_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecretsError::database(e, format!("Failed to get secret '{}'", name)))?;

        row.map(SecretRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(secret_name = %record.name), name = "db_create_secret")]
    async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO secrets (id, name, secret_type, description, version, active, ciphertext, iv, auth_tag, created_by, created_at, rotated_at, expires_at) \
             VALUES (?, ?, ?, ?, 1, 1, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&id)
        .bind(&record.name)
        .bind(record.secret_type.as_str())
        .bind(&record.description)
        .bind(&record.ciphertext)
        .bind(&record.iv)
        .bind(&record.auth_tag)
        .bind(&record.created_by)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return SecretsError::already_exists(&record.name);
            }
            tracing::error!(error = %e, secret_name = %record.name, "Failed to create secret");
            SecretsError::database(e, format!("Failed to create secret '{}'", record.name))
        })?;

        tracing::info!(
            secret_id = %id,
            secret_name = %record.name,
            secret_type = %record.secret_type,
            "Created new secret"
        );

        self.fetch_by_id(&id).await
    }

    #[instrument(
        skip(self, rotation),
        fields(secret_name = %rotation.name, expected_version = rotation.expected_version),
        name = "db_rotate_secret"
    )]
    async fn rotate(&self, rotation: SecretRotation) -> Result<(SecretRecord, RotationHistoryEntry)> {
        let name = rotation.name.as_str();
        let db_err = |context: &str| {
            let context = format!("{} for secret '{}'", context, name);
            move |e: sqlx::Error| SecretsError::database(e, context)
        };

        // Dropping `tx` on any early return rolls the whole rotation back.
        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin rotation"))?;

        let current = sqlx::query_as::<_, SecretRow>(&format!(
            "SELECT {} FROM secrets WHERE name = ? AND active = 1",
            SECRET_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to read current version"))?
        .ok_or_else(|| SecretsError::not_found(name))?;

        if current.version != rotation.expected_version {
            return Err(SecretsError::ConcurrentModification {
                key: name.to_string(),
                expected_version: rotation.expected_version,
            });
        }

        let new_version = current.version + 1;
        let updated = sqlx::query(
            "UPDATE secrets SET ciphertext = ?, iv = ?, auth_tag = ?, version = ?, rotated_at = ? \
             WHERE id = ? AND version = ? AND active = 1",
        )
        .bind(&rotation.ciphertext)
        .bind(&rotation.iv)
        .bind(&rotation.auth_tag)
        .bind(new_version)
        .bind(rotation.rotated_at)
        .bind(&current.id)
        .bind(current.version)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update secret"))?;

        if updated.rows_affected() != 1 {
            return Err(SecretsError::ConcurrentModification {
                key: name.to_string(),
                expected_version: rotation.expected_version,
            });
        }

        let entry = RotationHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            secret_id: current.id.clone(),
            secret_name: name.to_string(),
            old_version: current.version,
            new_version,
            reason: rotation.reason.clone(),
            actor: rotation.actor.clone(),
            origin_ip: rotation.origin_ip.clone(),
            user_agent: rotation.user_agent.clone(),
            rotated_at: rotation.rotated_at,
        };

        sqlx::query(
            "INSERT INTO secret_rotation_history (id, secret_id, secret_name, old_version, new_version, reason, actor, origin_ip, user_agent, rotated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.secret_id)
        .bind(&entry.secret_name)
        .bind(entry.old_version)
        .bind(entry.new_version)
        .bind(&entry.reason)
        .bind(&entry.actor)
        .bind(&entry.origin_ip)
        .bind(&entry.user_agent)
        .bind(entry.rotated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to append rotation history"))?;

        tx.commit().await.map_err(db_err("Failed to commit rotation"))?;

        tracing::info!(
            secret_name = %name,
            old_version = entry.old_version,
            new_version = entry.new_version,
            actor = %entry.actor,
            "Rotated secret"
        );

        let record = SecretRecord {
            version: new_version,
            ciphertext: rotation.ciphertext,
            iv: rotation.iv,
            auth_tag: rotation.auth_tag,
            rotated_at: Some(rotation.rotated_at),
            ..SecretRecord::try_from(current)?
        };
        Ok((record, entry))
    }

    #[instrument(skip(self), fields(secret_name = %name), name = "db_rotation_history")]
    async fn rotation_history(&self, name: &str) -> Result<Vec<RotationHistoryEntry>> {
        let rows = sqlx::query_as::<_, RotationRow>(
            "SELECT id, secret_id, secret_name, old_version, new_version, reason, actor, origin_ip, user_agent, rotated_at \
             FROM secret_rotation_history WHERE secret_name = ? ORDER BY rotated_at, new_version",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            SecretsError::database(e, format!("Failed to read rotation history for '{}'", name))
        })?;

        Ok(rows.into_iter().map(RotationHistoryEntry::from).collect())
    }

    #[instrument(skip(self), fields(secret_name = %name), name = "db_deactivate_secret")]
    async fn deactivate(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE secrets SET active = 0 WHERE name = ? AND active = 1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| SecretsError::database(e, format!("Failed to deactivate '{}'", name)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
