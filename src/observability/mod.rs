//! # Observability Infrastructure
//!
//! Structured logging through `tracing` and counters through the `metrics`
//! facade, with an optional Prometheus exporter.

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when enabled, the metrics exporter.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_tracing(config)?;

    if config.enable_metrics {
        init_metrics(config)?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        metrics_enabled = %config.enable_metrics,
        json_logging = %config.json_logging,
        "Observability initialized"
    );

    Ok(())
}
