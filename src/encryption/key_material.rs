//! Typed resolution of the field-encryption key.
//!
//! Sources are tried in a fixed order, once, at startup:
//!
//! 1. the manager's primary secret (`DATA_ENCRYPTION_KEY` by default)
//! 2. the manager's secondary secret (`PII_ENCRYPTION_KEY` by default)
//! 3. an external value from config or `CUSTODIA_DATA_ENCRYPTION_KEY`
//!
//! When none is available, production refuses to start and development
//! falls back to a random key that lives only as long as the process.

use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::error::{EncryptionError, Result};
use crate::config::{EncryptionConfig, Environment};
use crate::crypto::{self, DerivedKey};
use crate::secrets::{SecretString, SecretsManager};

/// Environment variable consulted for external key material.
pub const DATA_ENCRYPTION_KEY_ENV: &str = "CUSTODIA_DATA_ENCRYPTION_KEY";

/// Where the field key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    PrimarySecret(String),
    SecondarySecret(String),
    External,
    /// Random per-process key. Data sealed with it is unreadable after restart.
    Ephemeral,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::PrimarySecret(name) | KeySource::SecondarySecret(name) => write!(f, "secret:{}", name),
            KeySource::External => f.write_str("external"),
            KeySource::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

/// A derived field key and its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: DerivedKey,
    pub source: KeySource,
}

#[derive(Debug, Clone)]
pub struct KeyMaterialResolver {
    config: EncryptionConfig,
    environment: Environment,
}

impl KeyMaterialResolver {
    pub fn new(config: EncryptionConfig, environment: Environment) -> Self {
        Self { config, environment }
    }

    /// Fill in the external key from `CUSTODIA_DATA_ENCRYPTION_KEY` unless config already set one.
    pub fn with_process_env(mut self) -> Self {
        if self.config.external_key.is_none() {
            self.config.external_key = std::env::var(DATA_ENCRYPTION_KEY_ENV).ok().map(SecretString::from);
        }
        self
    }

    /// Resolve and derive the key. A manager that is present but not ready is an error.
    pub async fn resolve(&self, manager: Option<&SecretsManager>) -> Result<ResolvedKey> {
        let Some((material, source)) = self.find_material(manager).await? else {
            if self.environment.is_production() {
                return Err(EncryptionError::NoKeyMaterial { environment: self.environment });
            }
            warn!(
                environment = %self.environment,
                "No field-encryption key configured; using an ephemeral key. Encrypted fields will not survive a restart"
            );
            return Ok(ResolvedKey { key: DerivedKey::random()?, source: KeySource::Ephemeral });
        };

        let key = crypto::derive_key_blocking(
            Zeroizing::new(material.expose_secret().as_bytes().to_vec()),
            self.config.kdf_salt.as_bytes().to_vec(),
            self.config.kdf_iterations,
        )
        .await?;

        info!(key_source = %source, "Field-encryption key resolved");
        Ok(ResolvedKey { key, source })
    }

    async fn find_material(&self, manager: Option<&SecretsManager>) -> Result<Option<(SecretString, KeySource)>> {
        if let Some(manager) = manager {
            for (name, source) in [
                (&self.config.primary_secret_name, KeySource::PrimarySecret(self.config.primary_secret_name.clone())),
                (
                    &self.config.secondary_secret_name,
                    KeySource::SecondarySecret(self.config.secondary_secret_name.clone()),
                ),
            ] {
                if let Some(value) = manager.get_secret(name).await? {
                    if !value.is_blank() {
                        return Ok(Some((value, source)));
                    }
                }
            }
        }

        Ok(self
            .config
            .external_key
            .as_ref()
            .filter(|key| !key.is_blank())
            .map(|key| (key.clone(), KeySource::External)))
    }
}
