//! # Metrics Collection
//!
//! Counters for the trust core. Recording goes through the `metrics` facade,
//! so it is a no-op until [`init_metrics`] installs the Prometheus exporter.

use crate::config::ObservabilityConfig;
use crate::errors::{CustodiaError, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks trust-core counters
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Describe every counter so the exporter publishes HELP text.
    pub fn register_descriptions(&self) {
        describe_counter!(
            "custodia_secrets_loaded_total",
            Unit::Count,
            "Secrets decrypted into the in-memory cache"
        );
        describe_counter!(
            "custodia_secret_rotations_total",
            Unit::Count,
            "Secret rotations grouped by outcome"
        );
        describe_counter!(
            "custodia_signatures_total",
            Unit::Count,
            "Signing attempts grouped by outcome"
        );
        describe_counter!(
            "custodia_verifications_total",
            Unit::Count,
            "Signature verifications grouped by status"
        );
        describe_counter!(
            "custodia_field_decrypt_failures_total",
            Unit::Count,
            "ENC: values that failed to parse or authenticate"
        );
        describe_counter!(
            "custodia_audit_failures_total",
            Unit::Count,
            "Audit entries dropped after exhausting retries"
        );
    }

    pub fn record_secrets_loaded(&self, count: usize) {
        counter!("custodia_secrets_loaded_total").increment(count as u64);
    }

    pub fn record_secret_rotation(&self, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!("custodia_secret_rotations_total", "outcome" => outcome).increment(1);
    }

    pub fn record_signature(&self, outcome: &str) {
        counter!("custodia_signatures_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_verification(&self, status: &str) {
        counter!("custodia_verifications_total", "status" => status.to_string()).increment(1);
    }

    pub fn record_field_decrypt_failure(&self) {
        counter!("custodia_field_decrypt_failures_total").increment(1);
    }

    pub fn record_audit_failure(&self, event_type: &str) {
        counter!("custodia_audit_failures_total", "event_type" => event_type.to_string())
            .increment(1);
    }
}

/// Install the Prometheus exporter on `metrics_port`.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        CustodiaError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            CustodiaError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    MetricsRecorder::new().register_descriptions();

    info!(metrics_addr = %metrics_addr, service_name = %config.service_name, "Metrics collection initialized");
    Ok(())
}
