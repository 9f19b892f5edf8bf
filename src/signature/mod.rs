//! # Digital Signatures
//!
//! Judicial decisions are signed with RSA PKCS#1 v1.5 / SHA-256 using a
//! per-signer X.509 certificate and private key read from the PKI directory.
//! Certificates are cached until their `notAfter` passes.

pub mod certificate;
mod service;
mod signer;
mod types;

pub use certificate::{CertificateEntry, PublicCertificate};
pub use service::SignatureService;
pub use signer::{InvalidSignerId, SignerId};
pub use types::{
    DenialReason, SignatureDenied, SignatureResult, SigningContext, VerificationResult, VerificationStatus,
    SIGNATURE_ALGORITHM,
};
