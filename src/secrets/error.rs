//! Error types for secrets custody.

use thiserror::Error;

use super::manager::ManagerState;
use crate::crypto::CryptoError;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors raised by the secrets manager and its store.
///
/// `MissingPassphrase`, `StoreUnavailable` and `DecryptionFailed` during
/// initialization are fatal: the process must not continue past them.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Secret not found by name.
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// An active secret with this name already exists.
    #[error("Secret already exists: {key}")]
    AlreadyExists { key: String },

    /// The manager is not in the `Ready` state.
    #[error("Secrets manager is not ready (state: {state})")]
    NotReady { state: ManagerState },

    /// The master passphrase was empty or whitespace.
    #[error("Master passphrase is missing or blank")]
    MissingPassphrase,

    /// The secret store could not be reached.
    #[error("Secret store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Authenticated decryption of a stored secret failed.
    #[error("Failed to decrypt secret '{key}': wrong master passphrase or tampered record")]
    DecryptionFailed { key: String },

    /// The record changed between read and write.
    #[error("Secret '{key}' was modified concurrently (expected version {expected_version})")]
    ConcurrentModification { key: String, expected_version: i64 },

    /// Invalid secret name.
    #[error("Invalid secret key: {key} - {reason}")]
    InvalidKey { key: String, reason: String },

    /// Secret value or argument validation failed.
    #[error("Invalid secret value: {reason}")]
    InvalidValue { reason: String },

    /// Secret rotation failed.
    #[error("Rotation failed for secret '{key}': {reason}")]
    RotationFailed { key: String, reason: String },

    /// Store query failed.
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Primitive failure outside decryption (RNG, KDF task).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into(), reason: reason.into() }
    }

    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue { reason: reason.into() }
    }

    pub fn rotation_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RotationFailed { key: key.into(), reason: reason.into() }
    }

    pub fn database(source: sqlx::Error, context: impl Into<String>) -> Self {
        Self::Database { source, context: context.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for errors after which the process must not keep serving.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingPassphrase | Self::StoreUnavailable { .. } | Self::DecryptionFailed { .. }
        )
    }
}
