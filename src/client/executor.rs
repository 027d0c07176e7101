//! Bounded, counted execution of external calls.

use crate::models::{CallError, PacingConfig};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the external calls of one stage.
///
/// Every call gets the same timeout. Failures are logged and handed back to
/// the caller; the executor never retries.
#[derive(Debug)]
pub struct CallExecutor {
    timeout: Duration,
    between_calls: Duration,
    calls: AtomicU64,
    failures: AtomicU64,
    record_calls: AtomicU64,
}

impl CallExecutor {
    pub fn new(timeout: Duration, pacing: PacingConfig) -> Self {
        Self {
            timeout,
            between_calls: Duration::from_secs_f64(pacing.between_calls_secs.max(0.0)),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            record_calls: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reset the per-record call counter. Called by the driver before each record.
    pub fn begin_record(&self) {
        self.record_calls.store(0, Ordering::Relaxed);
    }

    /// Calls issued since construction.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls that failed or timed out.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Issue one call under the timeout.
    pub async fn call<T, F>(&self, label: &str, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, CallError>>,
    {
        if self.record_calls.fetch_add(1, Ordering::Relaxed) > 0 && !self.between_calls.is_zero() {
            tokio::time::sleep(self.between_calls).await;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!(call = label, "External call");

        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout {
                label: label.to_string(),
                after: self.timeout,
            }),
        };

        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(call = label, error = %e, "External call failed");
        }
        result
    }
}
