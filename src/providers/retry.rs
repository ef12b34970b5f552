//! Retry configuration and the shared retry helper.
//!
//! Only the self-hosted adapter retries internally: a model server that is
//! still loading a model fails the first call or two. Hosted families rely on
//! cross-provider failover instead.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{HuginError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// Uses linear backoff: the n-th retry waits `base_delay * n`.
///
/// ```rust
/// # use hugin::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(3)
///     .base_delay(Duration::from_secs(2));
/// assert_eq!(config.delay_for_retry(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Delay unit for linear backoff. Default: 2s.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retry.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the backoff unit.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by [`HuginError::is_transient()`])
/// up to `config.max_attempts`. Permanent errors are returned immediately.
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    provider: &str,
    operation: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    let delay = config.delay_for_retry(attempt + 1);
                    metrics::counter!(telemetry::RETRIES_TOTAL, "provider" => provider.to_owned())
                        .increment(1);
                    warn!(
                        provider,
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        HuginError::Configuration(format!("retry config for '{provider}' allows no attempts"))
    }))
}
