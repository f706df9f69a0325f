//! Error classification and exponential-backoff retry for store calls.
//!
//! Only [`ErrorClass::Retryable`] failures are retried. Everything else is
//! returned on the spot, unchanged, so callers can still match on the cause.
//! Each wrapped closure must be safe to run again: store batches are atomic,
//! and disconnect-hook registration replaces rather than duplicates.

use std::future::Future;
use std::time::Duration;

use shapesync_core::{ErrorClass, SyncResult};

use crate::config::RetryConfig;

/// Retry schedule derived from [`RetryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: if config.multiplier >= 1.0 { config.multiplier } else { 1.0 },
        }
    }
}

impl RetryPolicy {
    /// Fail fast: a single attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor)
    }

    /// Run `op`, retrying retryable failures with backoff
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if retry > 0 {
                        tracing::info!(op = op_name, retries = retry, "Store call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.class() == ErrorClass::Retryable && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        op = op_name,
                        error = %e,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying store call",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(op = op_name, error = %e, retries = retry, "Store call failed, retries exhausted");
                    } else {
                        tracing::debug!(op = op_name, error = %e, code = e.code(), "Store call failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}
