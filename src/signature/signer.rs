use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAX_SIGNER_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid signer id '{value}': {reason}")]
pub struct InvalidSignerId {
    pub value: String,
    pub reason: &'static str,
}

/// Identifier of a signing judge. Used verbatim in file names, so only
/// `[A-Za-z0-9_-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignerId(String);

impl SignerId {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidSignerId> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidSignerId { value, reason: "must not be empty" });
        }
        if value.len() > MAX_SIGNER_ID_LEN {
            return Err(InvalidSignerId { value, reason: "must be at most 64 characters" });
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(InvalidSignerId { value, reason: "only ASCII letters, digits, '_' and '-' are allowed" });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SignerId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for SignerId {
    type Err = InvalidSignerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SignerId {
    type Error = InvalidSignerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SignerId> for String {
    fn from(id: SignerId) -> Self {
        id.0
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
