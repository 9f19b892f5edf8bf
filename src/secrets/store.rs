//! Persistence seam for encrypted secret records.

use async_trait::async_trait;

use super::error::Result;
use super::types::{NewSecretRecord, RotationHistoryEntry, SecretRecord, SecretRotation};

/// Store of encrypted secret records plus the append-only rotation log.
///
/// Implementations persist ciphertext with its IV and tag only. `rotate`
/// must apply the record update and the history insert as one atomic unit.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Round-trip to the backing store.
    async fn ping(&self) -> Result<()>;

    /// Every active record.
    async fn fetch_active(&self) -> Result<Vec<SecretRecord>>;

    async fn fetch_active_by_name(&self, name: &str) -> Result<Option<SecretRecord>>;

    /// Insert version 1. Fails with `AlreadyExists` if an active record has the same name.
    async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord>;

    /// Replace the active ciphertext and append a history entry atomically.
    async fn rotate(&self, rotation: SecretRotation) -> Result<(SecretRecord, RotationHistoryEntry)>;

    /// History for `name`, oldest first.
    async fn rotation_history(&self, name: &str) -> Result<Vec<RotationHistoryEntry>>;

    /// Clear the active flag. Returns false when nothing was active.
    async fn deactivate(&self, name: &str) -> Result<bool>;

    /// Release connections. Further calls fail.
    async fn close(&self);
}
