//! # Structured Logging
//!
//! Installs the global `tracing` subscriber and provides span helpers for
//! secrets and signature operations. Span fields carry names and ids only.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{CustodiaError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Create a tracing span for a secrets operation.
///
/// ```rust,ignore
/// let span = secret_span!("rotate", "JWT_SECRET");
/// ```
#[macro_export]
macro_rules! secret_span {
    ($operation:expr, $name:expr) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret_name = %$name,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Create a tracing span for a signature operation.
#[macro_export]
macro_rules! signature_span {
    ($operation:expr, $signer_id:expr) => {
        tracing::info_span!(
            "signature_operation",
            operation = %$operation,
            signer_id = %$signer_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. Calling this twice (as
/// integration tests do) leaves the first subscriber in place.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            CustodiaError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if installed.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        environment = %config.environment,
        database_url = %config.database.url,
        pki_base_path = %config.pki.base_path.display(),
        pki_file_prefix = %config.pki.file_prefix,
        decrypt_failure_policy = ?config.encryption.decrypt_failure_policy,
        external_key_configured = config.encryption.external_key.is_some(),
        metrics_enabled = %config.observability.enable_metrics,
        "Custodia configuration"
    );
}
