//! The secrets custodian.
//!
//! [`SecretsManager`] derives the master key from an out-of-band passphrase,
//! decrypts every active record into a snapshot cache, and serves, creates
//! and rotates secrets. It is constructed explicitly and shared by reference;
//! independent instances never share state.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Closed
//!        ^              |
//!        +--- failure --+
//! ```

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn, Instrument};
use zeroize::Zeroizing;

use super::error::{Result, SecretsError};
use super::store::SecretStore;
use super::types::{
    NewSecretRecord, RequestOrigin, RotationHistoryEntry, SecretMetadata, SecretRecord,
    SecretRotation, SecretString, SecretType,
};
use crate::audit::{events, modules, AuditEntry, AuditTrail};
use crate::cache::SnapshotCache;
use crate::clock::Clock;
use crate::config::{DatabaseConfig, SecretsConfig};
use crate::crypto::{self, CryptoError, DerivedKey};
use crate::observability::MetricsRecorder;
use crate::storage::{create_pool, SqlxSecretStore};

const MAX_NAME_LEN: usize = 128;

/// Lifecycle of a [`SecretsManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where the manager finds its secret store.
pub enum StoreConnection {
    /// Open (and own) a pool for this database.
    Database(DatabaseConfig),
    /// Use a store owned by the caller. `close` leaves it open.
    Existing(Arc<dyn SecretStore>),
}

impl fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConnection::Database(config) => {
                f.debug_tuple("Database").field(&crate::storage::pool::sanitize_url(&config.url)).finish()
            }
            StoreConnection::Existing(_) => f.write_str("Existing(..)"),
        }
    }
}

/// Arguments for [`SecretsManager::create_secret`].
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub value: SecretString,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub actor: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSecret {
    pub fn new(name: impl Into<String>, value: impl Into<SecretString>, secret_type: SecretType) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret_type,
            description: None,
            actor: None,
            expires_at: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Result of a committed rotation.
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub metadata: SecretMetadata,
    pub history: RotationHistoryEntry,
}

#[derive(Clone)]
struct CachedSecret {
    value: SecretString,
    metadata: SecretMetadata,
}

struct ReadyState {
    store: Arc<dyn SecretStore>,
    owns_store: bool,
    key: DerivedKey,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Arc<ReadyState>),
    Closed,
}

impl Lifecycle {
    fn state(&self) -> ManagerState {
        match self {
            Lifecycle::Uninitialized => ManagerState::Uninitialized,
            Lifecycle::Initializing => ManagerState::Initializing,
            Lifecycle::Ready(_) => ManagerState::Ready,
            Lifecycle::Closed => ManagerState::Closed,
        }
    }
}

/// Single authority over encrypted secrets.
pub struct SecretsManager {
    config: SecretsConfig,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    metrics: MetricsRecorder,
    lifecycle: RwLock<Lifecycle>,
    init_lock: Mutex<()>,
    /// Serializes store-then-publish sequences so a reload cannot overwrite a newer commit.
    cache_writer: Mutex<()>,
    cache: SnapshotCache<CachedSecret>,
}

impl fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsManager")
            .field("kdf_iterations", &self.config.kdf_iterations)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl SecretsManager {
    pub fn new(config: SecretsConfig, clock: Arc<dyn Clock>, audit: AuditTrail) -> Self {
        Self {
            config,
            clock,
            audit,
            metrics: MetricsRecorder::new(),
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            init_lock: Mutex::new(()),
            cache_writer: Mutex::new(()),
            cache: SnapshotCache::new(),
        }
    }

    pub async fn state(&self) -> ManagerState {
        self.lifecycle.read().await.state()
    }

    /// Derive the master key, connect to the store and load every active secret.
    ///
    /// A second call on a ready manager is a no-op. Any error returned here is
    /// fatal for the process; the manager drops back to `Uninitialized`.
    pub async fn initialize(&self, passphrase: SecretString, store: StoreConnection) -> Result<()> {
        let _init = self.init_lock.lock().await;

        match self.lifecycle.read().await.state() {
            ManagerState::Ready => {
                info!("Secrets manager already initialized");
                return Ok(());
            }
            ManagerState::Closed => return Err(SecretsError::NotReady { state: ManagerState::Closed }),
            ManagerState::Uninitialized | ManagerState::Initializing => {}
        }

        if passphrase.is_blank() {
            error!("Master passphrase is missing or blank");
            return Err(SecretsError::MissingPassphrase);
        }

        *self.lifecycle.write().await = Lifecycle::Initializing;

        match self.bring_up(passphrase, store).await {
            Ok(ready) => {
                *self.lifecycle.write().await = Lifecycle::Ready(ready);
                info!(secret_count = self.cache.len().await, "Secrets manager ready");
                Ok(())
            }
            Err(e) => {
                *self.lifecycle.write().await = Lifecycle::Uninitialized;
                self.cache.clear().await;
                error!(error = %e, "Secrets manager initialization failed");
                Err(e)
            }
        }
    }

    async fn bring_up(&self, passphrase: SecretString, store: StoreConnection) -> Result<Arc<ReadyState>> {
        let (store, owns_store): (Arc<dyn SecretStore>, bool) = match store {
            StoreConnection::Database(config) => {
                let pool = create_pool(&config)
                    .await
                    .map_err(|e| SecretsError::store_unavailable(e.to_string()))?;
                (Arc::new(SqlxSecretStore::new(pool)), true)
            }
            StoreConnection::Existing(store) => (store, false),
        };

        if let Err(e) = store.ping().await {
            if owns_store {
                store.close().await;
            }
            return Err(SecretsError::store_unavailable(e.to_string()));
        }

        let key = crypto::derive_key_blocking(
            Zeroizing::new(passphrase.expose_secret().as_bytes().to_vec()),
            self.config.kdf_salt.as_bytes().to_vec(),
            self.config.kdf_iterations,
        )
        .await?;
        drop(passphrase);

        let ready = Arc::new(ReadyState { store, owns_store, key });
        if let Err(e) = self.load_into_cache(&ready).await {
            if ready.owns_store {
                ready.store.close().await;
            }
            return Err(e);
        }
        Ok(ready)
    }

    /// Writer lock for a store commit plus its cache update. Fails if the
    /// manager was closed while the caller waited.
    async fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        let writer = self.cache_writer.lock().await;
        match self.lifecycle.read().await.state() {
            ManagerState::Ready => Ok(writer),
            state => Err(SecretsError::NotReady { state }),
        }
    }

    async fn ready(&self) -> Result<Arc<ReadyState>> {
        match &*self.lifecycle.read().await {
            Lifecycle::Ready(ready) => Ok(Arc::clone(ready)),
            other => Err(SecretsError::NotReady { state: other.state() }),
        }
    }

    /// Decrypt every active record and publish the result as a new snapshot.
    ///
    /// A single authentication failure aborts the load and leaves the previous
    /// snapshot in place.
    pub async fn load_all_secrets(&self) -> Result<usize> {
        let ready = self.ready().await?;
        self.load_into_cache(&ready).await
    }

    /// Re-read the store after an out-of-band rotation.
    pub async fn reload_secrets(&self) -> Result<usize> {
        self.load_all_secrets().await
    }

    async fn load_into_cache(&self, ready: &ReadyState) -> Result<usize> {
        let _writer = self.cache_writer.lock().await;
        let records = ready.store.fetch_active().await?;
        let mut next = HashMap::with_capacity(records.len());

        for record in records {
            match decrypt_record(&ready.key, &record) {
                Ok(value) => {
                    next.insert(record.name.clone(), CachedSecret { value, metadata: record.metadata() });
                }
                Err(e) => {
                    error!(secret_name = %record.name, version = record.version, "Stored secret failed authentication");
                    self.audit
                        .record(
                            AuditEntry::new(events::SECRET_LOAD, modules::SECRETS, "Secret failed authenticated decryption")
                                .with_data(json!({
                                    "success": false,
                                    "secret_name": record.name,
                                    "version": record.version,
                                }))
                                .at(self.clock.now()),
                        )
                        .await;
                    return Err(e);
                }
            }
        }

        let count = next.len();
        self.cache.replace_all(next).await;
        self.metrics.record_secrets_loaded(count);
        info!(secret_count = count, "Loaded active secrets");
        Ok(count)
    }

    /// Cached value for `name`, or `None` when no active secret has that name.
    pub async fn get_secret(&self, name: &str) -> Result<Option<SecretString>> {
        self.ready().await?;
        let Some(cached) = self.cache.get(name).await else {
            return Ok(None);
        };
        if let Some(expires_at) = cached.metadata.expires_at {
            if self.clock.now() > expires_at {
                warn!(secret_name = %name, expires_at = %expires_at, "Serving expired secret; rotate it");
            }
        }
        Ok(Some(cached.value))
    }

    /// Like [`get_secret`](Self::get_secret) but absence is an error.
    pub async fn get_required_secret(&self, name: &str) -> Result<SecretString> {
        self.get_secret(name).await?.ok_or_else(|| {
            error!(secret_name = %name, "Required secret is missing");
            SecretsError::not_found(name)
        })
    }

    /// Encrypt and persist version 1 of a new secret. Returns metadata only.
    pub async fn create_secret(&self, request: NewSecret) -> Result<SecretMetadata> {
        let ready = self.ready().await?;
        let result = self
            .create_inner(&ready, &request)
            .instrument(crate::secret_span!("create", request.name))
            .await;

        let data = match &result {
            Ok(metadata) => json!({
                "success": true,
                "secret_name": request.name,
                "secret_type": metadata.secret_type,
                "version": metadata.version,
            }),
            Err(e) => json!({
                "success": false,
                "secret_name": request.name,
                "secret_type": request.secret_type,
                "error": e.to_string(),
            }),
        };
        let description = if result.is_ok() { "Secret created" } else { "Secret creation failed" };
        self.audit
            .record(
                AuditEntry::new(events::SECRET_CREATE, modules::SECRETS, description)
                    .with_actor(request.actor.clone())
                    .with_data(data)
                    .at(self.clock.now()),
            )
            .await;

        result
    }

    async fn create_inner(&self, ready: &ReadyState, request: &NewSecret) -> Result<SecretMetadata> {
        validate_name(&request.name)?;
        if request.value.is_empty() {
            return Err(SecretsError::invalid_value("secret value cannot be empty"));
        }

        let sealed = crypto::seal(&ready.key, request.value.expose_secret().as_bytes(), request.name.as_bytes())?;
        let _writer = self.lock_writer().await?;
        let record = ready
            .store
            .insert(NewSecretRecord {
                name: request.name.clone(),
                secret_type: request.secret_type,
                description: request.description.clone(),
                ciphertext: sealed.ciphertext,
                iv: sealed.nonce.to_vec(),
                auth_tag: sealed.tag.to_vec(),
                created_by: request.actor.clone(),
                created_at: self.clock.now(),
                expires_at: request.expires_at,
            })
            .await?;

        let metadata = record.metadata();
        self.cache
            .upsert(record.name.clone(), CachedSecret { value: request.value.clone(), metadata: metadata.clone() })
            .await;

        info!(secret_name = %record.name, secret_type = %record.secret_type, "Secret created");
        Ok(metadata)
    }

    /// Replace the value of an active secret.
    ///
    /// The record update and its history entry commit together. On any
    /// failure the cache keeps serving the previous value.
    pub async fn rotate_secret(
        &self,
        name: &str,
        new_value: impl Into<SecretString>,
        reason: &str,
        actor: &str,
        origin: RequestOrigin,
    ) -> Result<RotationOutcome> {
        let ready = self.ready().await?;
        let new_value = new_value.into();
        let result = self
            .rotate_inner(&ready, name, &new_value, reason, actor, &origin)
            .instrument(crate::secret_span!("rotate", name))
            .await;

        self.metrics.record_secret_rotation(result.is_ok());
        let (description, data) = match &result {
            Ok(outcome) => (
                "Secret rotated",
                json!({
                    "success": true,
                    "secret_name": name,
                    "old_version": outcome.history.old_version,
                    "new_version": outcome.history.new_version,
                    "reason": reason,
                }),
            ),
            Err(e) => (
                "Secret rotation failed",
                json!({
                    "success": false,
                    "secret_name": name,
                    "reason": reason,
                    "error": e.to_string(),
                }),
            ),
        };
        self.audit
            .record(
                AuditEntry::new(events::SECRET_ROTATE, modules::SECRETS, description)
                    .with_actor(Some(actor))
                    .with_data(data)
                    .with_origin(origin.origin_ip, origin.user_agent)
                    .at(self.clock.now()),
            )
            .await;

        result
    }

    async fn rotate_inner(
        &self,
        ready: &ReadyState,
        name: &str,
        new_value: &SecretString,
        reason: &str,
        actor: &str,
        origin: &RequestOrigin,
    ) -> Result<RotationOutcome> {
        if new_value.is_empty() {
            return Err(SecretsError::invalid_value("secret value cannot be empty"));
        }
        if reason.trim().is_empty() || actor.trim().is_empty() {
            return Err(SecretsError::rotation_failed(name, "reason and actor are required"));
        }

        let _writer = self.lock_writer().await?;
        let current = ready.store.fetch_active_by_name(name).await?.ok_or_else(|| SecretsError::not_found(name))?;
        let sealed = crypto::seal(&ready.key, new_value.expose_secret().as_bytes(), name.as_bytes())?;

        let (record, history) = ready
            .store
            .rotate(SecretRotation {
                name: name.to_string(),
                expected_version: current.version,
                ciphertext: sealed.ciphertext,
                iv: sealed.nonce.to_vec(),
                auth_tag: sealed.tag.to_vec(),
                reason: reason.to_string(),
                actor: actor.to_string(),
                origin_ip: origin.origin_ip.clone(),
                user_agent: origin.user_agent.clone(),
                rotated_at: self.clock.now(),
            })
            .await
            .inspect_err(|e| error!(secret_name = %name, error = %e, "Secret rotation rolled back"))?;

        let metadata = record.metadata();
        self.cache
            .upsert(name.to_string(), CachedSecret { value: new_value.clone(), metadata: metadata.clone() })
            .await;

        Ok(RotationOutcome { metadata, history })
    }

    /// Metadata of every cached secret, sorted by name.
    pub async fn list_secrets(&self) -> Result<Vec<SecretMetadata>> {
        self.ready().await?;
        let snapshot = self.cache.snapshot().await;
        let mut list: Vec<SecretMetadata> = snapshot.values().map(|c| c.metadata.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    pub async fn rotation_history(&self, name: &str) -> Result<Vec<RotationHistoryEntry>> {
        let ready = self.ready().await?;
        ready.store.rotation_history(name).await
    }

    /// Soft-delete: the row stays, the secret stops being served.
    pub async fn deactivate_secret(&self, name: &str, actor: &str) -> Result<()> {
        let ready = self.ready().await?;
        let result = match self.lock_writer().await {
            Ok(_writer) => match ready.store.deactivate(name).await {
                Ok(true) => {
                    self.cache.remove(name).await;
                    Ok(())
                }
                Ok(false) => Err(SecretsError::not_found(name)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        self.audit
            .record(
                AuditEntry::new(
                    events::SECRET_DEACTIVATE,
                    modules::SECRETS,
                    if result.is_ok() { "Secret deactivated" } else { "Secret deactivation failed" },
                )
                .with_actor(Some(actor))
                .with_data(json!({ "success": result.is_ok(), "secret_name": name }))
                .at(self.clock.now()),
            )
            .await;

        result
    }

    /// Release the store, drop the derived key and clear the cache.
    pub async fn close(&self) {
        let _init = self.init_lock.lock().await;
        let _writer = self.cache_writer.lock().await;
        let previous = std::mem::replace(&mut *self.lifecycle.write().await, Lifecycle::Closed);
        self.cache.clear().await;

        if let Lifecycle::Ready(ready) = previous {
            if ready.owns_store {
                ready.store.close().await;
            }
            // The key is zeroed once the last in-flight operation releases its handle.
            drop(ready);
        }
        info!("Secrets manager closed");
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SecretsError::invalid_key(name, format!("length must be 1..={}", MAX_NAME_LEN)));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        return Err(SecretsError::invalid_key(name, "only ASCII letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(())
}

fn decrypt_record(key: &DerivedKey, record: &SecretRecord) -> Result<SecretString> {
    let plaintext = crypto::open(key, &record.ciphertext, &record.iv, &record.auth_tag, record.name.as_bytes())
        .map_err(|e| match e {
            CryptoError::Open | CryptoError::InvalidNonceLength { .. } | CryptoError::InvalidTagLength { .. } => {
                SecretsError::DecryptionFailed { key: record.name.clone() }
            }
            other => SecretsError::Crypto(other),
        })?;

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| SecretsError::DecryptionFailed { key: record.name.clone() })?;
    Ok(SecretString::new(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::config::AuditConfig;
    use chrono::{Duration, TimeZone};

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<SqlxSecretStore>,
        audit: Arc<InMemoryAuditSink>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = DatabaseConfig {
                url: format!("sqlite://{}", dir.path().join("manager.db").display()),
                ..Default::default()
            };
            let pool = create_pool(&config).await.unwrap();
            Self {
                _dir: dir,
                store: Arc::new(SqlxSecretStore::new(pool)),
                audit: Arc::new(InMemoryAuditSink::new()),
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap())),
            }
        }

        fn manager(&self) -> SecretsManager {
            let config = SecretsConfig { kdf_iterations: 1_000, ..Default::default() };
            let trail = AuditTrail::new(self.audit.clone(), &AuditConfig::default());
            SecretsManager::new(config, self.clock.clone(), trail)
        }

        async fn ready_manager(&self, passphrase: &str) -> SecretsManager {
            let manager = self.manager();
            manager.initialize(passphrase.into(), StoreConnection::Existing(self.store.clone())).await.unwrap();
            manager
        }
    }

    #[tokio::test]
    async fn test_accessors_fail_before_initialize() {
        let harness = Harness::new().await;
        let manager = harness.manager();

        assert_eq!(manager.state().await, ManagerState::Uninitialized);
        assert!(matches!(
            manager.get_secret("JWT_SECRET").await,
            Err(SecretsError::NotReady { state: ManagerState::Uninitialized })
        ));
        assert!(manager.list_secrets().await.is_err());
    }

    #[tokio::test]
    async fn test_blank_passphrase_is_fatal() {
        let harness = Harness::new().await;
        let manager = harness.manager();

        let err = manager.initialize("   ".into(), StoreConnection::Existing(harness.store.clone())).await.unwrap_err();
        assert!(matches!(err, SecretsError::MissingPassphrase));
        assert!(err.is_fatal());
        assert_eq!(manager.state().await, ManagerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let harness = Harness::new().await;
        harness.store.close().await;
        let manager = harness.manager();

        let err = manager.initialize("passphrase".into(), StoreConnection::Existing(harness.store.clone())).await.unwrap_err();
        assert!(matches!(err, SecretsError::StoreUnavailable { .. }));
        assert_eq!(manager.state().await, ManagerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("first").await;
        manager.create_secret(NewSecret::new("JWT_SECRET", "s3cr3t", SecretType::Jwt)).await.unwrap();

        // Second call keeps the original key and cache.
        manager.initialize("second".into(), StoreConnection::Existing(harness.store.clone())).await.unwrap();
        assert_eq!(manager.get_secret("JWT_SECRET").await.unwrap().unwrap().expose_secret(), "s3cr3t");
    }

    #[tokio::test]
    async fn test_create_get_and_metadata_only() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("correct horse").await;

        let metadata = manager
            .create_secret(NewSecret::new("SMTP_PASSWORD", "mail-pass", SecretType::Smtp).description("relay").actor("ops"))
            .await
            .unwrap();
        assert_eq!(metadata.version, 1);
        assert!(!serde_json::to_string(&metadata).unwrap().contains("mail-pass"));

        assert_eq!(manager.get_required_secret("SMTP_PASSWORD").await.unwrap().expose_secret(), "mail-pass");
        assert!(manager.get_secret("UNKNOWN").await.unwrap().is_none());
        assert!(matches!(manager.get_required_secret("UNKNOWN").await, Err(SecretsError::NotFound { .. })));

        let created = harness.audit.entries_of(events::SECRET_CREATE);
        assert_eq!(created.len(), 1);
        assert!(!serde_json::to_string(&created[0]).unwrap().contains("mail-pass"));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;

        assert!(matches!(
            manager.create_secret(NewSecret::new("../etc", "v", SecretType::Other)).await,
            Err(SecretsError::InvalidKey { .. })
        ));
        assert!(matches!(
            manager.create_secret(NewSecret::new("EMPTY", "", SecretType::Other)).await,
            Err(SecretsError::InvalidValue { .. })
        ));
        manager.create_secret(NewSecret::new("DUP", "v", SecretType::Api)).await.unwrap();
        assert!(matches!(
            manager.create_secret(NewSecret::new("DUP", "w", SecretType::Api)).await,
            Err(SecretsError::AlreadyExists { .. })
        ));
        assert_eq!(harness.audit.entries_of(events::SECRET_CREATE).len(), 4);
    }

    #[tokio::test]
    async fn test_rotate_updates_cache_and_history() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("HMAC_KEY", "v1", SecretType::Hmac)).await.unwrap();

        let origin = RequestOrigin { origin_ip: Some("10.0.0.5".into()), user_agent: Some("cli".into()) };
        let outcome = manager.rotate_secret("HMAC_KEY", "v2", "compromise drill", "sec@x", origin).await.unwrap();

        assert_eq!(outcome.metadata.version, 2);
        assert_eq!(outcome.history.old_version, 1);
        assert_eq!(manager.get_secret("HMAC_KEY").await.unwrap().unwrap().expose_secret(), "v2");

        let audits = harness.audit.entries_of(events::SECRET_ROTATE);
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].origin_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(audits[0].affected_data["new_version"], 2);
    }

    #[tokio::test]
    async fn test_rotate_missing_secret_is_audited() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;

        let err = manager.rotate_secret("NOPE", "x", "why", "who", RequestOrigin::default()).await.unwrap_err();
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(harness.audit.entries_of(events::SECRET_ROTATE)[0].affected_data["success"], false);
    }

    #[tokio::test]
    async fn test_rotate_requires_reason_and_actor() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("K", "v1", SecretType::Aes)).await.unwrap();

        assert!(manager.rotate_secret("K", "v2", " ", "who", RequestOrigin::default()).await.is_err());
        assert_eq!(manager.get_secret("K").await.unwrap().unwrap().expose_secret(), "v1");
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_load() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("right").await;
        manager.create_secret(NewSecret::new("JWT_SECRET", "s3cr3t", SecretType::Jwt)).await.unwrap();

        let other = harness.manager();
        let err = other.initialize("wrong".into(), StoreConnection::Existing(harness.store.clone())).await.unwrap_err();
        assert!(matches!(err, SecretsError::DecryptionFailed { ref key } if key == "JWT_SECRET"));
        assert!(err.is_fatal());
        assert_eq!(other.state().await, ManagerState::Uninitialized);
        assert_eq!(harness.audit.entries_of(events::SECRET_LOAD).len(), 1);
    }

    #[tokio::test]
    async fn test_ciphertext_moved_between_rows_fails() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("A", "alpha", SecretType::Other)).await.unwrap();
        manager.create_secret(NewSecret::new("B", "bravo", SecretType::Other)).await.unwrap();

        sqlx::query(
            "UPDATE secrets SET ciphertext = (SELECT ciphertext FROM secrets WHERE name = 'A'), \
             iv = (SELECT iv FROM secrets WHERE name = 'A'), auth_tag = (SELECT auth_tag FROM secrets WHERE name = 'A') \
             WHERE name = 'B'",
        )
        .execute(harness.store.pool())
        .await
        .unwrap();

        let err = manager.reload_secrets().await.unwrap_err();
        assert!(matches!(err, SecretsError::DecryptionFailed { ref key } if key == "B"));
        // Previous snapshot keeps serving.
        assert_eq!(manager.get_secret("B").await.unwrap().unwrap().expose_secret(), "bravo");
    }

    #[tokio::test]
    async fn test_reload_picks_up_out_of_band_rotation() {
        let harness = Harness::new().await;
        let first = harness.ready_manager("pw").await;
        let second = harness.ready_manager("pw").await;
        first.create_secret(NewSecret::new("API_TOKEN", "t1", SecretType::Api)).await.unwrap();

        assert!(second.get_secret("API_TOKEN").await.unwrap().is_none());
        assert_eq!(second.reload_secrets().await.unwrap(), 1);
        assert_eq!(second.get_secret("API_TOKEN").await.unwrap().unwrap().expose_secret(), "t1");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_expired_secret_is_served_with_warning() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        let expires = harness.clock.now() + Duration::days(1);
        manager.create_secret(NewSecret::new("TEMP", "v", SecretType::Other).expires_at(expires)).await.unwrap();

        harness.clock.advance(Duration::days(2));
        assert!(manager.get_secret("TEMP").await.unwrap().is_some());
        assert!(logs_contain("Serving expired secret"));
    }

    #[tokio::test]
    async fn test_deactivate_and_list() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("B_KEY", "b", SecretType::Other)).await.unwrap();
        manager.create_secret(NewSecret::new("A_KEY", "a", SecretType::Other)).await.unwrap();

        let names: Vec<_> = manager.list_secrets().await.unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["A_KEY", "B_KEY"]);

        manager.deactivate_secret("A_KEY", "ops").await.unwrap();
        assert!(manager.get_secret("A_KEY").await.unwrap().is_none());
        assert!(matches!(manager.deactivate_secret("A_KEY", "ops").await, Err(SecretsError::NotFound { .. })));
        assert_eq!(harness.audit.entries_of(events::SECRET_DEACTIVATE).len(), 2);
    }

    #[tokio::test]
    async fn test_close_clears_state() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("K", "v", SecretType::Other)).await.unwrap();

        manager.close().await;
        assert_eq!(manager.state().await, ManagerState::Closed);
        assert!(matches!(manager.get_secret("K").await, Err(SecretsError::NotReady { state: ManagerState::Closed })));
        assert!(manager.initialize("pw".into(), StoreConnection::Existing(harness.store.clone())).await.is_err());
        // Caller-owned store stays open.
        harness.store.ping().await.unwrap();
    }

    /// Pauses the next `fetch_active` after it has read rows, until released.
    struct GatedStore {
        inner: Arc<SqlxSecretStore>,
        armed: std::sync::atomic::AtomicBool,
        fetched: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl SecretStore for GatedStore {
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        async fn fetch_active(&self) -> Result<Vec<SecretRecord>> {
            let rows = self.inner.fetch_active().await?;
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.fetched.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }

        async fn fetch_active_by_name(&self, name: &str) -> Result<Option<SecretRecord>> {
            self.inner.fetch_active_by_name(name).await
        }

        async fn insert(&self, record: NewSecretRecord) -> Result<SecretRecord> {
            self.inner.insert(record).await
        }

        async fn rotate(&self, rotation: SecretRotation) -> Result<(SecretRecord, RotationHistoryEntry)> {
            self.inner.rotate(rotation).await
        }

        async fn rotation_history(&self, name: &str) -> Result<Vec<RotationHistoryEntry>> {
            self.inner.rotation_history(name).await
        }

        async fn deactivate(&self, name: &str) -> Result<bool> {
            self.inner.deactivate(name).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reload_does_not_overwrite_concurrent_rotation() {
        let harness = Harness::new().await;
        let gated = Arc::new(GatedStore {
            inner: harness.store.clone(),
            armed: std::sync::atomic::AtomicBool::new(false),
            fetched: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let manager = Arc::new(harness.manager());
        manager.initialize("pw".into(), StoreConnection::Existing(gated.clone())).await.unwrap();
        manager.create_secret(NewSecret::new("JWT_SECRET", "s3cr3t", SecretType::Jwt)).await.unwrap();

        gated.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let reload = tokio::spawn({
            let manager = manager.clone();
            async move { manager.reload_secrets().await }
        });
        // The reload now holds version 1 rows and has not published them yet.
        gated.fetched.notified().await;

        let rotate = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager
                    .rotate_secret("JWT_SECRET", "s3cr3t-v2", "scheduled rotation", "admin@x", RequestOrigin::default())
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        gated.release.notify_one();

        reload.await.unwrap().unwrap();
        let outcome = rotate.await.unwrap().unwrap();
        assert_eq!(outcome.metadata.version, 2);
        assert_eq!(manager.get_secret("JWT_SECRET").await.unwrap().unwrap().expose_secret(), "s3cr3t-v2");
        assert_eq!(manager.list_secrets().await.unwrap()[0].version, 2);
    }

    #[tokio::test]
    async fn test_operations_after_close_are_rejected() {
        let harness = Harness::new().await;
        let manager = harness.ready_manager("pw").await;
        manager.create_secret(NewSecret::new("K", "v", SecretType::Other)).await.unwrap();
        manager.close().await;

        let err = manager.rotate_secret("K", "v2", "r", "a", RequestOrigin::default()).await.unwrap_err();
        assert!(matches!(err, SecretsError::NotReady { state: ManagerState::Closed }));
        assert!(manager.cache.is_empty().await);
    }
}
