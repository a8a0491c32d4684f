//! Connection retry and protocol timers.
//!
//! Only connection establishment is retried. A `send` that fails is reported
//! to the caller as is; re-sending configuration is the workflow's decision.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use emcp_common::TimerConfig;

use crate::error::{DriverError, DriverResult};

/// Protocol timers, resolved from [`TimerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTimers {
    /// Extra connection attempts after the first one fails
    pub connect_retries: u32,
    pub retry_delay: Duration,
    /// Hard bound on any single read, write or command
    pub operation_timeout: Duration,
    /// Confirmed-commit window; `None` means plain commit
    pub confirm_window: Option<Duration>,
}

impl Default for DriverTimers {
    fn default() -> Self {
        Self::from(&TimerConfig::default())
    }
}

impl From<&TimerConfig> for DriverTimers {
    fn from(config: &TimerConfig) -> Self {
        Self {
            connect_retries: config.connect_retries,
            retry_delay: config.retry_delay(),
            operation_timeout: config.operation_timeout(),
            confirm_window: config.confirm_window(),
        }
    }
}

impl DriverTimers {
    /// Total attempts allowed by the retry budget.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_retries.saturating_add(1)
    }
}

/// Future returned by one connection attempt.
pub type AttemptFuture<'a, T> = Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'a>>;

/// Runs `attempt` against `state` until it succeeds, fails with a
/// non-retryable error, or the retry budget is spent.
///
/// Each attempt is bounded by the operation timeout; an attempt that times out
/// counts as a retryable failure.
pub async fn connect_with_retry<S, T, F>(
    timers: &DriverTimers,
    target: &str,
    state: &mut S,
    mut attempt: F,
) -> DriverResult<T>
where
    S: ?Sized + Send,
    F: for<'a> FnMut(&'a mut S) -> AttemptFuture<'a, T>,
{
    let attempts = timers.connect_attempts();
    let mut last_error = None;

    for n in 1..=attempts {
        let result = match tokio::time::timeout(timers.operation_timeout, attempt(state)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::timeout(
                format!("connect to {}", target),
                timers.operation_timeout,
            )),
        };

        match result {
            Ok(value) => {
                debug!(target_host = target, attempt = n, "Connected");
                return Ok(value);
            }
            Err(e) if e.is_retryable() && n < attempts => {
                warn!(
                    target_host = target,
                    attempt = n,
                    max_attempts = attempts,
                    error = %e,
                    "Connect attempt failed, retrying in {:?}",
                    timers.retry_delay
                );
                last_error = Some(e);
                tokio::time::sleep(timers.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| DriverError::unreachable(target, "no connection attempt made")))
}
