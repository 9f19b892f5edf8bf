use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::{AuditEntry, AuditSink};
use crate::config::AuditConfig;
use crate::observability::MetricsRecorder;

/// Retrying front for an [`AuditSink`].
///
/// `record` never returns an error. If the sink keeps failing after
/// `max_attempts`, the entry is reported through `tracing::error!`, the
/// failure counter is bumped, and control returns to the caller.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    max_attempts: u32,
    backoff: Duration,
    failed: Arc<AtomicU64>,
    metrics: MetricsRecorder,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Self {
        Self {
            sink,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            failed: Arc::new(AtomicU64::new(0)),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Submit an entry, retrying with linear backoff.
    pub async fn record(&self, entry: AuditEntry) {
        let mut attempt = 1;
        loop {
            match self.sink.log(entry.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        error = %e,
                        event_type = %entry.event_type,
                        attempt,
                        "Audit submission failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_audit_failure(&entry.event_type);
                    error!(
                        error = %e,
                        event_type = %entry.event_type,
                        module = %entry.module,
                        actor_id = ?entry.actor_id,
                        description = %entry.description,
                        affected_data = %entry.affected_data,
                        attempts = attempt,
                        "Audit entry could not be persisted"
                    );
                    return;
                }
            }
        }
    }

    /// Number of entries that were given up on.
    pub fn failed_submissions(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("failed_submissions", &self.failed_submissions())
            .finish()
    }
}
