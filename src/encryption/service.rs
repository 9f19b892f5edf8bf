use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::error::{EncryptionError, Result};
use super::key_material::{KeyMaterialResolver, KeySource, ResolvedKey};
use super::record::{SensitiveRecord, SENSITIVE_FIELDS};
use super::{is_encrypted, DecryptFailurePolicy, ENCRYPTED_PREFIX};
use crate::audit::{events, modules, AuditEntry, AuditTrail};
use crate::clock::Clock;
use crate::crypto::{self, DerivedKey, NONCE_LEN, TAG_LEN};
use crate::observability::MetricsRecorder;
use crate::secrets::SecretsManager;

/// Encrypts and decrypts individual PII fields.
#[derive(Clone)]
pub struct DataEncryptionService {
    key: Arc<DerivedKey>,
    source: KeySource,
    policy: DecryptFailurePolicy,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for DataEncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEncryptionService")
            .field("source", &self.source)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DataEncryptionService {
    pub fn new(
        resolved: ResolvedKey,
        policy: DecryptFailurePolicy,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key: Arc::new(resolved.key),
            source: resolved.source,
            policy,
            audit,
            clock,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Resolve key material (see [`KeyMaterialResolver`]) and build the service.
    pub async fn initialize(
        resolver: &KeyMaterialResolver,
        manager: Option<&SecretsManager>,
        policy: DecryptFailurePolicy,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let resolved = resolver.resolve(manager).await?;
        Ok(Self::new(resolved, policy, audit, clock))
    }

    pub fn key_source(&self) -> &KeySource {
        &self.source
    }

    pub fn policy(&self) -> DecryptFailurePolicy {
        self.policy
    }

    /// Seal a field. Empty input yields `None`; input already carrying `ENC:` is returned as is.
    #[instrument(skip_all)]
    pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        let plaintext = match plaintext {
            None | Some("") => return Ok(None),
            Some(value) if is_encrypted(value) => return Ok(Some(value.to_string())),
            Some(value) => value,
        };

        let sealed = crypto::seal(&self.key, plaintext.as_bytes(), &[])?;
        Ok(Some(format!(
            "{}{}:{}:{}",
            ENCRYPTED_PREFIX,
            STANDARD.encode(sealed.nonce),
            STANDARD.encode(sealed.tag),
            STANDARD.encode(&sealed.ciphertext)
        )))
    }

    /// Open a field. Values without `ENC:` are legacy plaintext and come back unchanged.
    ///
    /// A malformed or unauthenticated `ENC:` value is handled by the configured
    /// [`DecryptFailurePolicy`].
    #[instrument(skip_all)]
    pub async fn decrypt(&self, value: Option<&str>) -> Result<Option<String>> {
        let value = match value {
            None | Some("") => return Ok(None),
            Some(value) if !is_encrypted(value) => return Ok(Some(value.to_string())),
            Some(value) => value,
        };

        match self.open_field(value) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(reason) => self.on_failure(value, reason).await,
        }
    }

    fn open_field(&self, value: &str) -> std::result::Result<String, String> {
        let body = &value[ENCRYPTED_PREFIX.len()..];
        let parts: Vec<&str> = body.split(':').collect();
        let [iv, tag, ciphertext] = parts.as_slice() else {
            return Err(format!("expected 3 segments after the marker, found {}", parts.len()));
        };

        let decode = |segment: &str, label: &str| {
            STANDARD.decode(segment).map_err(|e| format!("{} is not valid base64: {}", label, e))
        };
        let iv = decode(iv, "iv")?;
        let tag = decode(tag, "auth tag")?;
        let ciphertext = decode(ciphertext, "ciphertext")?;

        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(format!("iv/tag length {}/{} (expected {}/{})", iv.len(), tag.len(), NONCE_LEN, TAG_LEN));
        }

        let plaintext = crypto::open(&self.key, &ciphertext, &iv, &tag, &[]).map_err(|e| e.to_string())?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| "plaintext is not valid UTF-8".to_string())
    }

    async fn on_failure(&self, value: &str, reason: String) -> Result<Option<String>> {
        error!(policy = %self.policy, reason = %reason, "Encrypted field failed integrity check");
        self.metrics.record_field_decrypt_failure();
        self.audit
            .record(
                AuditEntry::new(events::ENCRYPTION_INTEGRITY, modules::ENCRYPTION, "Encrypted field failed integrity check")
                    .with_data(json!({
                        "reason": reason,
                        "policy": self.policy.to_string(),
                        "value_length": value.len(),
                    }))
                    .at(self.clock.now()),
            )
            .await;

        match self.policy {
            DecryptFailurePolicy::PassThrough => Ok(Some(value.to_string())),
            DecryptFailurePolicy::Reject => Err(EncryptionError::Integrity { reason }),
        }
    }

    /// Seal every sensitive field present on `record`. Other fields are untouched.
    pub fn encrypt_record<R: SensitiveRecord>(&self, mut record: R) -> Result<R> {
        for field in SENSITIVE_FIELDS {
            if let Some(sealed) = self.encrypt(record.sensitive_field(field))? {
                record.set_sensitive_field(field, sealed);
            }
        }
        debug!("Record fields encrypted");
        Ok(record)
    }

    pub async fn decrypt_record<R: SensitiveRecord>(&self, mut record: R) -> Result<R> {
        for field in SENSITIVE_FIELDS {
            let current = record.sensitive_field(field).map(str::to_string);
            if let Some(opened) = self.decrypt(current.as_deref()).await? {
                record.set_sensitive_field(field, opened);
            }
        }
        Ok(record)
    }
}
