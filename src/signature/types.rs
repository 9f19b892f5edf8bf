use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::SignerId;

/// Fixed signature algorithm label: RSA PKCS#1 v1.5 over SHA-256.
pub const SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

/// Why no signature was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    CertificateNotFound,
    CertificateExpired,
    CertificateNotYetValid,
    /// Unreadable PEM, unsupported key, or key/certificate mismatch.
    CertificateInvalid,
    SigningFailed,
}

impl DenialReason {
    /// Stable code written to the audit log.
    pub fn code(self) -> &'static str {
        match self {
            DenialReason::CertificateNotFound => "CERTIFICADO_NO_ENCONTRADO",
            DenialReason::CertificateExpired => "CERTIFICADO_EXPIRADO",
            DenialReason::CertificateNotYetValid => "CERTIFICADO_NO_VIGENTE",
            DenialReason::CertificateInvalid => "CERTIFICADO_INVALIDO",
            DenialReason::SigningFailed => "FIRMA_FALLIDA",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A refused signing request. Always audited before it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Signature denied for signer {signer_id}: {reason} ({detail})")]
pub struct SignatureDenied {
    pub signer_id: SignerId,
    pub reason: DenialReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
    pub signer_id: SignerId,
    pub certificate_common_name: String,
    pub serial_number: String,
    pub algorithm: String,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the signed content, lowercase hex.
    pub content_hash: String,
    pub signature_base64: String,
    /// The signature checked out against the certificate right after signing.
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Valid,
    InvalidSignature,
    SignerUnknown,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Valid => "valid",
            VerificationStatus::InvalidSignature => "invalid-signature",
            VerificationStatus::SignerUnknown => "signer-unknown",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a verification. Never an error: `detail` always explains the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub content_hash: String,
    pub certificate_common_name: Option<String>,
    pub serial_number: Option<String>,
    pub detail: String,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }
}

/// Request metadata recorded with every signing attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningContext {
    pub actor_id: Option<String>,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}
