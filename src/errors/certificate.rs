use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures surfaced while loading or using a signer's certificate material.
///
/// A missing file is not an error here: the loader reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The certificate file exists but could not be read.
    #[error("Failed to read certificate at {path}: {source}")]
    CertificateReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key file exists but could not be read.
    #[error("Failed to read private key at {path}: {source}")]
    PrivateKeyReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate PEM contents were invalid or unreadable.
    #[error("Certificate file {path} is not a valid PEM: {source}")]
    InvalidCertificatePem {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The private key PEM contents were invalid or not an RSA key.
    #[error("Private key file {path} does not contain a supported RSA private key")]
    InvalidPrivateKey {
        path: PathBuf,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The private key does not belong to the certificate's subject public key.
    #[error("Certificate {path} and its private key do not match")]
    CertificateKeyMismatch { path: PathBuf },

    /// The certificate is not yet valid.
    #[error("Certificate at {path} is not valid before {not_before}")]
    CertificateNotYetValid { path: PathBuf, not_before: DateTime<Utc> },

    /// The certificate is expired.
    #[error("Certificate at {path} expired at {not_after}")]
    CertificateExpired { path: PathBuf, not_after: DateTime<Utc> },

    /// Subject, serial or validity could not be extracted.
    #[error("Failed to extract certificate metadata from {path}: {source}")]
    CertificateMetadata {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The RSA signing primitive failed.
    #[error("RSA signing failed for {signer_id}")]
    SigningFailed { signer_id: String },
}
