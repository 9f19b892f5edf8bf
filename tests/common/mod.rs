//! Common test utilities for all integration tests.
//!
//! Provides temporary databases, PKI directories with generated
//! certificates, and pre-wired audit trails.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber, PKCS_RSA_SHA256};
use tempfile::TempDir;

use custodia::audit::{AuditTrail, InMemoryAuditSink};
use custodia::config::{AuditConfig, DatabaseConfig, EncryptionConfig, PkiConfig, SecretsConfig};
use custodia::signature::SignerId;
use custodia::storage::{create_pool, DbPool, SqlxSecretStore};

pub const SIGNER_KEY_PKCS8: &str = include_str!("../fixtures/signer_rsa2048.pk8.pem");
pub const SIGNER_KEY_PKCS1: &str = include_str!("../fixtures/signer_rsa2048.pkcs1.pem");
pub const OTHER_KEY_PKCS8: &str = include_str!("../fixtures/other_rsa2048.pk8.pem");

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// PBKDF2 at full strength makes every test slow; correctness does not depend on the count.
pub fn fast_secrets_config() -> SecretsConfig {
    SecretsConfig { kdf_iterations: 1_000, ..Default::default() }
}

pub fn fast_encryption_config() -> EncryptionConfig {
    EncryptionConfig { kdf_iterations: 1_000, ..Default::default() }
}

pub fn audit_trail() -> (AuditTrail, Arc<InMemoryAuditSink>) {
    let sink = Arc::new(InMemoryAuditSink::new());
    let config = AuditConfig { max_attempts: 2, retry_backoff_ms: 1 };
    (AuditTrail::new(sink.clone(), &config), sink)
}

/// A SQLite file in its own temporary directory.
pub struct TestDb {
    _dir: TempDir,
    pub config: DatabaseConfig,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("custodia.db").display()),
            ..Default::default()
        };
        Self { _dir: dir, config }
    }

    pub async fn pool(&self) -> DbPool {
        create_pool(&self.config).await.expect("create pool")
    }

    pub async fn store(&self) -> Arc<SqlxSecretStore> {
        Arc::new(SqlxSecretStore::new(self.pool().await))
    }
}

/// Self-signed RSA certificate for `key_pem` with a fixed validity window.
pub fn certificate_pem(
    key_pem: &str,
    common_name: &str,
    serial: u8,
    not_before: (i32, u8, u8),
    not_after: (i32, u8, u8),
) -> String {
    let key_pair = KeyPair::from_pem_and_sign_algo(key_pem, &PKCS_RSA_SHA256).expect("load RSA fixture key");

    let mut params = CertificateParams::new(Vec::<String>::new()).expect("certificate params");
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name.push(DnType::OrganizationName, "Rama Judicial");
    params.serial_number = Some(SerialNumber::from_slice(&[serial]));
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);

    params.self_signed(&key_pair).expect("self-sign certificate").pem()
}

/// Temporary PKI directory laid out as `juez_<id>.crt` / `juez_<id>.key`.
pub struct PkiDir {
    _dir: TempDir,
    pub config: PkiConfig,
}

impl PkiDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = PkiConfig::new(dir.path());
        Self { _dir: dir, config }
    }

    pub fn install(&self, signer: &SignerId, key_pem: &str, cert_pem: &str) {
        fs::write(self.config.private_key_path(signer), key_pem).expect("write key");
        fs::write(self.config.certificate_path(signer), cert_pem).expect("write certificate");
    }

    pub fn remove_key(&self, signer: &SignerId) {
        fs::remove_file(self.config.private_key_path(signer)).expect("remove key");
    }
}
