//! Secret value wrapper and the persisted record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::SecretsError;

/// A string that redacts itself in `Debug`, `Display` and serialization and
/// is zeroed when dropped.
///
/// Deserialization accepts the real value so passphrases and external keys
/// can be read from configuration. Reading the value back requires an
/// explicit [`SecretString::expose_secret`] call.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the plaintext. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for empty or whitespace-only values.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of secret held in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecretType {
    Jwt,
    Hmac,
    Aes,
    Pki,
    Api,
    Smtp,
    Other,
}

impl SecretType {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretType::Jwt => "JWT",
            SecretType::Hmac => "HMAC",
            SecretType::Aes => "AES",
            SecretType::Pki => "PKI",
            SecretType::Api => "API",
            SecretType::Smtp => "SMTP",
            SecretType::Other => "OTHER",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JWT" => Ok(SecretType::Jwt),
            "HMAC" => Ok(SecretType::Hmac),
            "AES" => Ok(SecretType::Aes),
            "PKI" => Ok(SecretType::Pki),
            "API" => Ok(SecretType::Api),
            "SMTP" => Ok(SecretType::Smtp),
            "OTHER" => Ok(SecretType::Other),
            other => Err(SecretsError::invalid_value(format!("unknown secret type '{}'", other))),
        }
    }
}

/// A persisted secret row. `ciphertext` is only meaningful under the
/// master key that sealed it.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRecord {
    pub id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub version: i64,
    pub active: bool,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SecretRecord {
    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            name: self.name.clone(),
            secret_type: self.secret_type,
            description: self.description.clone(),
            version: self.version,
            active: self.active,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            rotated_at: self.rotated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Public view of a secret. Never carries the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub version: i64,
    pub active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Immutable row written once per rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationHistoryEntry {
    pub id: String,
    pub secret_id: String,
    pub secret_name: String,
    pub old_version: i64,
    pub new_version: i64,
    pub reason: String,
    pub actor: String,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Input for inserting version 1 of a secret.
#[derive(Debug, Clone)]
pub struct NewSecretRecord {
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for one atomic rotation: the new ciphertext plus its history row.
#[derive(Debug, Clone)]
pub struct SecretRotation {
    pub name: String,
    /// Version the caller read; the store refuses to rotate anything else.
    pub expected_version: i64,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub reason: String,
    pub actor: String,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Who asked for a rotation and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}
