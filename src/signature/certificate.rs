//! Loading per-signer certificate material from the PKI directory.
//!
//! Each signer has two sibling files, `<prefix><id>.crt` and
//! `<prefix><id>.key`. A missing file is reported as `Ok(None)`; anything
//! present but unusable is a [`CertificateError`].

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use ring::rand::SecureRandom;
use ring::signature::{RsaKeyPair, RsaPublicKeyComponents, UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_SHA256};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;
use zeroize::Zeroizing;

use super::SignerId;
use crate::cache::Expiring;
use crate::config::PkiConfig;
use crate::errors::CertificateError;

/// The public half of a signer's material. Enough to verify.
#[derive(Debug, Clone)]
pub struct PublicCertificate {
    certificate_pem: String,
    common_name: String,
    serial_number: String,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    /// DER `RSAPublicKey` from the subject public key info.
    public_key: Vec<u8>,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl PublicCertificate {
    /// Parse a PEM certificate. Only RSA subject keys are accepted.
    pub fn from_pem(pem: &[u8], path: &Path) -> Result<Self, CertificateError> {
        let der = CertificateDer::from_pem_slice(pem).map_err(|err| CertificateError::InvalidCertificatePem {
            path: path.to_path_buf(),
            source: anyhow!(err),
        })?;

        let metadata_error =
            |source: anyhow::Error| CertificateError::CertificateMetadata { path: path.to_path_buf(), source };

        let (_, parsed) =
            X509Certificate::from_der(der.as_ref()).map_err(|err| metadata_error(anyhow!("{err}")))?;

        let common_name = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| parsed.subject().to_string());

        let validity = parsed.validity();
        let valid_from = to_chrono(validity.not_before.timestamp())
            .ok_or_else(|| metadata_error(anyhow!("notBefore out of range")))?;
        let valid_to = to_chrono(validity.not_after.timestamp())
            .ok_or_else(|| metadata_error(anyhow!("notAfter out of range")))?;

        let spki = parsed.public_key();
        let (modulus, exponent) = match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => {
                (trim_leading_zeros(rsa.modulus).to_vec(), trim_leading_zeros(rsa.exponent).to_vec())
            }
            Ok(_) => return Err(metadata_error(anyhow!("subject public key is not RSA"))),
            Err(err) => return Err(metadata_error(anyhow!("{err}"))),
        };

        Ok(Self {
            certificate_pem: String::from_utf8_lossy(pem).into_owned(),
            common_name,
            serial_number: format!("{:x}", parsed.serial),
            valid_from,
            valid_to,
            public_key: spki.subject_public_key.data.to_vec(),
            modulus,
            exponent,
        })
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_to(&self) -> DateTime<Utc> {
        self.valid_to
    }

    /// True when `now` lies in `[valid_from, valid_to]`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_to
    }

    /// Check an RSA PKCS#1 v1.5 SHA-256 signature over `content`.
    pub fn verify(&self, content: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, &self.public_key)
            .verify(content, signature)
            .is_ok()
    }

    fn matches(&self, key_pair: &RsaKeyPair) -> bool {
        let components: RsaPublicKeyComponents<Vec<u8>> = key_pair.public().into();
        trim_leading_zeros(&components.n) == self.modulus.as_slice()
            && trim_leading_zeros(&components.e) == self.exponent.as_slice()
    }
}

/// A signer's certificate plus its private key.
///
/// The key never leaves this type; `Debug` omits it.
#[derive(Clone)]
pub struct CertificateEntry {
    signer: SignerId,
    certificate: PublicCertificate,
    key_pair: Arc<RsaKeyPair>,
}

impl CertificateEntry {
    pub fn certificate(&self) -> &PublicCertificate {
        &self.certificate
    }

    pub(crate) fn sign(&self, content: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>, CertificateError> {
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, rng, content, &mut signature)
            .map_err(|_| CertificateError::SigningFailed { signer_id: self.signer.to_string() })?;
        Ok(signature)
    }
}

impl fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("signer", &self.signer)
            .field("common_name", &self.certificate.common_name)
            .field("serial_number", &self.certificate.serial_number)
            .field("valid_from", &self.certificate.valid_from)
            .field("valid_to", &self.certificate.valid_to)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl Expiring for CertificateEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.certificate.valid_to
    }
}

/// Load the signer's certificate and key. `Ok(None)` when either file is absent.
pub async fn load_signer(config: &PkiConfig, signer: &SignerId) -> Result<Option<CertificateEntry>, CertificateError> {
    let cert_path = config.certificate_path(signer);
    let key_path = config.private_key_path(signer);

    let Some(cert_bytes) = read_optional(&cert_path)
        .await
        .map_err(|e| CertificateError::CertificateReadError { path: cert_path.clone(), source: e })?
    else {
        return Ok(None);
    };
    let Some(key_bytes) = read_optional(&key_path)
        .await
        .map_err(|e| CertificateError::PrivateKeyReadError { path: key_path.clone(), source: e })?
    else {
        return Ok(None);
    };
    let key_bytes = Zeroizing::new(key_bytes);

    let certificate = PublicCertificate::from_pem(&cert_bytes, &cert_path)?;
    let key_pair = parse_rsa_key(&key_bytes, &key_path)?;
    if !certificate.matches(&key_pair) {
        return Err(CertificateError::CertificateKeyMismatch { path: key_path });
    }

    Ok(Some(CertificateEntry { signer: signer.clone(), certificate, key_pair: Arc::new(key_pair) }))
}

/// Load only the signer's certificate. The private key is not needed to verify.
pub async fn load_public_certificate(
    config: &PkiConfig,
    signer: &SignerId,
) -> Result<Option<PublicCertificate>, CertificateError> {
    let cert_path = config.certificate_path(signer);
    match read_optional(&cert_path).await {
        Ok(Some(bytes)) => PublicCertificate::from_pem(&bytes, &cert_path).map(Some),
        Ok(None) => Ok(None),
        Err(source) => Err(CertificateError::CertificateReadError { path: cert_path, source }),
    }
}

/// PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`) are accepted.
fn parse_rsa_key(pem: &[u8], path: &Path) -> Result<RsaKeyPair, CertificateError> {
    let invalid = |source: Option<anyhow::Error>| CertificateError::InvalidPrivateKey { path: path.to_path_buf(), source };

    let key = PrivateKeyDer::from_pem_slice(pem).map_err(|err| invalid(Some(anyhow!(err))))?;
    match &key {
        PrivateKeyDer::Pkcs8(der) => {
            RsaKeyPair::from_pkcs8(der.secret_pkcs8_der()).map_err(|err| invalid(Some(anyhow!("{err}"))))
        }
        PrivateKeyDer::Pkcs1(der) => {
            RsaKeyPair::from_der(der.secret_pkcs1_der()).map_err(|err| invalid(Some(anyhow!("{err}"))))
        }
        _ => Err(invalid(None)),
    }
}

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn to_chrono(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
