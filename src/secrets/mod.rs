//! # Secrets Custody
//!
//! Confidential values (signing keys, tokens, SMTP credentials) are stored
//! encrypted with AES-256-GCM under a master key derived by PBKDF2 from a
//! passphrase supplied out of band. The stored ciphertext is bound to the
//! secret's name, so records cannot be swapped between rows.
//!
//! - [`SecretsManager`] owns the derived key and the decrypted cache.
//! - [`SecretStore`] is the persistence seam; [`crate::storage::SqlxSecretStore`]
//!   implements it on SQLite.
//! - Rotation replaces the value and appends a history entry in one transaction.

pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{Result, SecretsError};
pub use manager::{ManagerState, NewSecret, RotationOutcome, SecretsManager, StoreConnection};
pub use store::SecretStore;
pub use types::{
    NewSecretRecord, RequestOrigin, RotationHistoryEntry, SecretMetadata, SecretRecord, SecretRotation,
    SecretString, SecretType,
};

/// Environment variable holding the master passphrase.
pub const MASTER_PASSPHRASE_ENV: &str = "CUSTODIA_MASTER_PASSPHRASE";
