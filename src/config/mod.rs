//! # Configuration Management
//!
//! Configuration is layered: built-in defaults, then an optional TOML/YAML
//! file, then `CUSTODIA__`-prefixed environment variables using `__` as the
//! nesting separator (`CUSTODIA__PKI__BASE_PATH=/srv/pki`).
//!
//! The master passphrase is deliberately absent from every layer here; the
//! binary reads it out of band and hands it to the secrets manager directly.

pub mod settings;

pub use settings::{
    AppConfig, AuditConfig, DatabaseConfig, EncryptionConfig, Environment, ObservabilityConfig,
    PkiConfig, SecretsConfig,
};

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "CUSTODIA_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CUSTODIA";
