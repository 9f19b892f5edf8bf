//! # Field-level Encryption
//!
//! Personally identifying fields are stored as
//! `ENC:<iv_b64>:<tag_b64>:<ciphertext_b64>` strings, sealed with AES-256-GCM
//! under a key derived from material held by the secrets manager. Values
//! without the `ENC:` marker are legacy plaintext.

mod error;
pub mod key_material;
pub mod record;
pub mod service;

pub use error::{EncryptionError, Result};
pub use key_material::{KeyMaterialResolver, KeySource, ResolvedKey, DATA_ENCRYPTION_KEY_ENV};
pub use record::{PersonRecord, SensitiveRecord, PLAINTEXT_FIELDS, SENSITIVE_FIELDS};
pub use service::DataEncryptionService;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker prefix of an encrypted field value.
pub const ENCRYPTED_PREFIX: &str = "ENC:";

/// True when `value` carries the `ENC:` marker. Says nothing about whether it decrypts.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// What `decrypt` does with an `ENC:` value that is malformed or fails authentication.
///
/// Both policies log the failure, bump `custodia_field_decrypt_failures_total`
/// and write an `encryption.integrity` audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptFailurePolicy {
    /// Return the stored string unchanged.
    #[default]
    PassThrough,
    /// Return [`EncryptionError::Integrity`].
    Reject,
}

impl fmt::Display for DecryptFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecryptFailurePolicy::PassThrough => f.write_str("passthrough"),
            DecryptFailurePolicy::Reject => f.write_str("reject"),
        }
    }
}
