use base64::{engine::general_purpose::STANDARD, Engine};
use ring::rand::SystemRandom;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::certificate::{load_public_certificate, load_signer, CertificateEntry, PublicCertificate};
use super::types::{
    DenialReason, SignatureDenied, SignatureResult, SigningContext, VerificationResult, VerificationStatus,
    SIGNATURE_ALGORITHM,
};
use super::SignerId;
use crate::audit::{events, modules, AuditEntry, AuditTrail};
use crate::cache::{Expiring, SnapshotCache};
use crate::clock::Clock;
use crate::config::PkiConfig;
use crate::crypto::sha256_hex;
use crate::errors::CertificateError;
use crate::observability::MetricsRecorder;

/// Signs content with per-signer RSA certificates and verifies signatures.
///
/// Signing fails closed: no certificate, or a certificate outside its
/// validity window, yields a [`SignatureDenied`]. Verification always
/// returns a [`VerificationResult`] that explains itself.
pub struct SignatureService {
    config: PkiConfig,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    cache: SnapshotCache<CertificateEntry>,
    rng: SystemRandom,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for SignatureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureService").field("base_path", &self.config.base_path).finish_non_exhaustive()
    }
}

impl SignatureService {
    pub fn new(config: PkiConfig, clock: Arc<dyn Clock>, audit: AuditTrail) -> Self {
        Self {
            config,
            clock,
            audit,
            cache: SnapshotCache::new(),
            rng: SystemRandom::new(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// SHA-256 of `content`, lowercase hex.
    pub fn hash(&self, content: &[u8]) -> String {
        sha256_hex(content)
    }

    /// Cached entry for `signer`, loading it from disk when absent or past `valid_to`.
    async fn certificate(&self, signer: &SignerId) -> Result<Option<CertificateEntry>, CertificateError> {
        let now = self.clock.now();
        if let Some(entry) = self.cache.get_fresh(signer.as_str(), now).await {
            return Ok(Some(entry));
        }

        let Some(entry) = load_signer(&self.config, signer).await? else {
            return Ok(None);
        };
        debug!(
            signer_id = %signer,
            serial_number = %entry.certificate().serial_number(),
            valid_to = %entry.certificate().valid_to(),
            "Loaded signer certificate"
        );
        if !entry.is_expired_at(now) {
            self.cache.upsert(signer.as_str(), entry.clone()).await;
        }
        Ok(Some(entry))
    }

    /// Sign `content` for `signer`. Every outcome is audited.
    pub async fn sign(
        &self,
        signer: &SignerId,
        content: &[u8],
        context: &SigningContext,
    ) -> Result<SignatureResult, SignatureDenied> {
        let content_hash = sha256_hex(content);
        let outcome = self
            .try_sign(signer, content, &content_hash)
            .instrument(crate::signature_span!("sign", signer))
            .await;

        let (description, data) = match &outcome {
            Ok(result) => {
                info!(signer_id = %signer, serial_number = %result.serial_number, "Content signed");
                self.metrics.record_signature("success");
                (
                    "Content signed",
                    json!({
                        "success": true,
                        "signer_id": signer,
                        "content_hash": result.content_hash,
                        "algorithm": result.algorithm,
                        "serial_number": result.serial_number,
                        "certificate_common_name": result.certificate_common_name,
                        "verified": result.verified,
                    }),
                )
            }
            Err(denied) => {
                warn!(signer_id = %signer, reason = %denied.reason, detail = %denied.detail, "Signature denied");
                self.metrics.record_signature(denied.reason.code());
                (
                    "Signature denied",
                    json!({
                        "success": false,
                        "signer_id": signer,
                        "reason": denied.reason.code(),
                        "detail": denied.detail,
                        "content_hash": content_hash,
                    }),
                )
            }
        };

        self.audit
            .record(
                AuditEntry::new(events::SIGNATURE_SIGN, modules::SIGNATURE, description)
                    .with_actor(context.actor_id.clone())
                    .with_data(data)
                    .with_origin(context.origin_ip.clone(), context.user_agent.clone())
                    .at(self.clock.now()),
            )
            .await;

        outcome
    }

    async fn try_sign(
        &self,
        signer: &SignerId,
        content: &[u8],
        content_hash: &str,
    ) -> Result<SignatureResult, SignatureDenied> {
        let deny = |reason: DenialReason, detail: String| SignatureDenied { signer_id: signer.clone(), reason, detail };

        let entry = match self.certificate(signer).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return Err(deny(DenialReason::CertificateNotFound, "no certificate on file for this signer".into()))
            }
            Err(e) => return Err(deny(DenialReason::CertificateInvalid, e.to_string())),
        };

        let certificate = entry.certificate();
        let now = self.clock.now();
        if !certificate.is_valid_at(now) {
            if now < certificate.valid_from() {
                return Err(deny(
                    DenialReason::CertificateNotYetValid,
                    format!("certificate is not valid before {}", certificate.valid_from()),
                ));
            }
            return Err(deny(
                DenialReason::CertificateExpired,
                format!("certificate expired at {}", certificate.valid_to()),
            ));
        }

        let signature = entry.sign(content, &self.rng).map_err(|e| deny(DenialReason::SigningFailed, e.to_string()))?;
        let verified = certificate.verify(content, &signature);
        if !verified {
            warn!(signer_id = %signer, "Fresh signature did not verify against its certificate");
        }

        Ok(SignatureResult {
            signer_id: signer.clone(),
            certificate_common_name: certificate.common_name().to_string(),
            serial_number: certificate.serial_number().to_string(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            timestamp: now,
            content_hash: content_hash.to_string(),
            signature_base64: STANDARD.encode(&signature),
            verified,
        })
    }

    /// Check `signature_base64` over `content` against the signer's certificate.
    ///
    /// The validity window is not enforced here: a signature made while the
    /// certificate was valid stays verifiable after it expires.
    pub async fn verify(&self, content: &[u8], signature_base64: &str, signer: &SignerId) -> VerificationResult {
        let content_hash = sha256_hex(content);
        let result = self.check(content, signature_base64, signer, content_hash).await;

        self.metrics.record_verification(result.status.as_str());
        debug!(signer_id = %signer, status = %result.status, "Signature verification");

        self.audit
            .record(
                AuditEntry::new(events::SIGNATURE_VERIFY, modules::SIGNATURE, verification_description(result.status))
                    .with_data(json!({
                        "signer_id": signer,
                        "status": result.status,
                        "content_hash": result.content_hash,
                        "serial_number": result.serial_number,
                    }))
                    .at(self.clock.now()),
            )
            .await;

        result
    }

    async fn check(
        &self,
        content: &[u8],
        signature_base64: &str,
        signer: &SignerId,
        content_hash: String,
    ) -> VerificationResult {
        let unknown = |detail: String, content_hash: String| VerificationResult {
            status: VerificationStatus::SignerUnknown,
            content_hash,
            certificate_common_name: None,
            serial_number: None,
            detail,
        };

        // Read from disk; the signing cache can lag a renewal.
        let certificate: PublicCertificate = match load_public_certificate(&self.config, signer).await {
            Ok(Some(certificate)) => certificate,
            Ok(None) => return unknown("no certificate on file for this signer".into(), content_hash),
            Err(e) => return unknown(format!("certificate unusable: {}", e), content_hash),
        };

        let (status, detail) = match STANDARD.decode(signature_base64.trim()) {
            Err(_) => (VerificationStatus::InvalidSignature, "signature is not valid base64".to_string()),
            Ok(signature) if certificate.verify(content, &signature) => {
                (VerificationStatus::Valid, "signature matches content and certificate".to_string())
            }
            Ok(_) => (
                VerificationStatus::InvalidSignature,
                "signature does not match this content under the signer's certificate".to_string(),
            ),
        };

        VerificationResult {
            status,
            content_hash,
            certificate_common_name: Some(certificate.common_name().to_string()),
            serial_number: Some(certificate.serial_number().to_string()),
            detail,
        }
    }

    /// Drop the cached entry so the next use rereads the files.
    pub async fn invalidate(&self, signer: &SignerId) -> bool {
        self.cache.remove(signer.as_str()).await.is_some()
    }

    /// Signer ids currently held in the cache, sorted.
    pub async fn cached_signers(&self) -> Vec<String> {
        self.cache.keys().await
    }
}

fn verification_description(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Valid => "Signature verified",
        VerificationStatus::InvalidSignature => "Signature rejected",
        VerificationStatus::SignerUnknown => "Signature not verifiable: signer unknown",
    }
}
