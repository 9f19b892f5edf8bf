//! # Configuration Settings
//!
//! Defines the configuration structure for the custodia trust core.

use crate::config::{CONFIG_PATH_ENV, ENV_PREFIX};
use crate::encryption::DecryptFailurePolicy;
use crate::errors::{CustodiaError, Result};
use crate::secrets::SecretString;
use crate::signature::SignerId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Deployment environment. Drives how missing key material is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,

    #[validate(nested)]
    pub database: DatabaseConfig,

    #[validate(nested)]
    pub secrets: SecretsConfig,

    #[validate(nested)]
    pub encryption: EncryptionConfig,

    #[validate(nested)]
    pub pki: PkiConfig,

    #[validate(nested)]
    pub audit: AuditConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load defaults, then `path` (or the file named by `CUSTODIA_CONFIG`), then
    /// `CUSTODIA__*` environment overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let file = path.map(Path::to_path_buf).or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(CustodiaError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.is_sqlite() {
            return Err(CustodiaError::validation_field(
                "Database URL must start with 'sqlite://'",
                "database.url",
            ));
        }

        if self.secrets.kdf_salt == self.encryption.kdf_salt {
            return Err(CustodiaError::validation_field(
                "Secrets and field encryption must use distinct KDF salts",
                "encryption.kdf_salt",
            ));
        }

        if self.environment.is_production() {
            for (field, iterations) in [
                ("secrets.kdf_iterations", self.secrets.kdf_iterations),
                ("encryption.kdf_iterations", self.encryption.kdf_iterations),
            ] {
                if iterations < crate::crypto::PBKDF2_ITERATIONS {
                    return Err(CustodiaError::validation_field(
                        format!(
                            "Production requires at least {} PBKDF2 iterations, got {}",
                            crate::crypto::PBKDF2_ITERATIONS,
                            iterations
                        ),
                        field,
                    ));
                }
            }
        }

        if self.encryption.primary_secret_name == self.encryption.secondary_secret_name {
            return Err(CustodiaError::validation_field(
                "Primary and secondary key secret names must differ",
                "encryption.secondary_secret_name",
            ));
        }

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Apply embedded migrations when the pool is created
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/custodia.db".to_string(),
            max_connections: 5,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite://") || self.url.starts_with("sqlite:")
    }
}

/// Secrets manager key derivation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretsConfig {
    /// Fixed PBKDF2 salt for the master key
    #[validate(length(min = 8, message = "KDF salt must be at least 8 bytes"))]
    pub kdf_salt: String,

    #[validate(range(min = 1, message = "KDF iterations must be at least 1"))]
    pub kdf_iterations: u32,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            kdf_salt: "custodia-secrets-kdf-v1".to_string(),
            kdf_iterations: crate::crypto::PBKDF2_ITERATIONS,
        }
    }
}

/// Field-level encryption settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Secret consulted first for key material
    #[validate(length(min = 1, message = "Primary secret name cannot be empty"))]
    pub primary_secret_name: String,

    /// Secret consulted when the primary one is absent
    #[validate(length(min = 1, message = "Secondary secret name cannot be empty"))]
    pub secondary_secret_name: String,

    /// Key material supplied outside the secrets store
    pub external_key: Option<SecretString>,

    /// Fixed PBKDF2 salt for field keys
    #[validate(length(min = 8, message = "KDF salt must be at least 8 bytes"))]
    pub kdf_salt: String,

    #[validate(range(min = 1, message = "KDF iterations must be at least 1"))]
    pub kdf_iterations: u32,

    /// What `decrypt` does with a malformed or unauthenticated `ENC:` value
    pub decrypt_failure_policy: DecryptFailurePolicy,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            primary_secret_name: "DATA_ENCRYPTION_KEY".to_string(),
            secondary_secret_name: "PII_ENCRYPTION_KEY".to_string(),
            external_key: None,
            kdf_salt: "custodia-field-encryption-v1".to_string(),
            kdf_iterations: crate::crypto::PBKDF2_ITERATIONS,
            decrypt_failure_policy: DecryptFailurePolicy::default(),
        }
    }
}

/// Location of per-signer certificate material
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PkiConfig {
    /// Directory holding `<prefix><id>.key` and `<prefix><id>.crt`
    pub base_path: PathBuf,

    #[validate(length(max = 64, message = "File prefix must be at most 64 characters"))]
    pub file_prefix: String,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self { base_path: PathBuf::from("./pki"), file_prefix: "juez_".to_string() }
    }
}

impl PkiConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into(), ..Default::default() }
    }

    pub fn certificate_path(&self, signer: &SignerId) -> PathBuf {
        self.base_path.join(format!("{}{}.crt", self.file_prefix, signer))
    }

    pub fn private_key_path(&self, signer: &SignerId) -> PathBuf {
        self.base_path.join(format!("{}{}.key", self.file_prefix, signer))
    }
}

/// Audit submission retry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuditConfig {
    #[validate(range(min = 1, max = 10, message = "Audit attempts must be between 1 and 10"))]
    pub max_attempts: u32,

    #[validate(range(max = 10_000, message = "Audit backoff must be at most 10 seconds"))]
    pub retry_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { max_attempts: 3, retry_backoff_ms: 50 }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Install the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "custodia".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
