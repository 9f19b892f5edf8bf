//! # Custodia
//!
//! Cryptographic trust core for a judicial case-management system.
//!
//! ```text
//!              passphrase (out of band)
//!                        ↓
//! SecretStore ←→ SecretsManager ──key material──→ DataEncryptionService
//!                        ↓                                ↓
//!                    AuditTrail ←──── SignatureService ← PKI directory
//! ```
//!
//! ## Core Components
//!
//! - **SecretsManager**: derives the master key with PBKDF2, keeps every active
//!   secret decrypted in a snapshot cache, and rotates secrets atomically
//!   together with their history entry.
//! - **DataEncryptionService**: seals PII fields into `ENC:` strings with
//!   AES-256-GCM.
//! - **SignatureService**: signs and verifies content with per-signer RSA
//!   certificates, refusing to sign outside a certificate's validity window.
//! - **AuditTrail**: retrying front for the audit sink; every signing attempt,
//!   rotation and integrity failure is recorded.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use custodia::{
//!     audit::{AuditTrail, InMemoryAuditSink},
//!     clock::system_clock,
//!     config::AppConfig,
//!     secrets::{SecretsManager, StoreConnection},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! let audit = AuditTrail::new(Arc::new(InMemoryAuditSink::new()), &config.audit);
//! let manager = SecretsManager::new(config.secrets.clone(), system_clock(), audit);
//! manager
//!     .initialize("correct horse".into(), StoreConnection::Database(config.database.clone()))
//!     .await?;
//! let jwt = manager.get_required_secret("JWT_SECRET").await?;
//! # drop(jwt);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod encryption;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod signature;
pub mod storage;

// Re-export commonly used types and traits
pub use config::{AppConfig, Environment};
pub use encryption::DataEncryptionService;
pub use errors::{CustodiaError, Result};
pub use observability::init_tracing;
pub use secrets::SecretsManager;
pub use signature::SignatureService;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
