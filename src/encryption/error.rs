use thiserror::Error;

use crate::config::Environment;
use crate::crypto::CryptoError;
use crate::secrets::SecretsError;

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Errors raised by field encryption and key resolution.
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// No secret, external value or ephemeral fallback could supply a key.
    #[error("No key material available for field encryption ({environment} environment)")]
    NoKeyMaterial { environment: Environment },

    /// An `ENC:` value was malformed or failed authentication under the reject policy.
    #[error("Encrypted field failed integrity check: {reason}")]
    Integrity { reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),
}
