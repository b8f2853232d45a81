//! Bounded retry for transient transport failures.
//!
//! Retryability is decided by matching the error text against a fixed
//! vocabulary. Everything else fails on the first attempt.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::cancel::CancellationScope;
use crate::config::RetryConfig;
use crate::{klog_debug, klog_warn, Result};

/// Transient transport failures worth another attempt.
static TRANSIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)connection reset|\beof\b|connection refused|broken pipe",
        r"|manifest[-_ ]unknown|timeout|timed out",
    ))
    .unwrap()
});

pub fn is_transient(message: &str) -> bool {
    TRANSIENT_RE.is_match(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after attempt `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_unit: Duration::from_secs(config.backoff_unit_secs),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// Progress of a retry loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Delay computed after the most recent failed attempt.
    pub delay: Duration,
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub state: RetryState,
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The backoff sleep races the
    /// scope; cancellation during the sleep ends the loop with
    /// `Error::Aborted`.
    pub async fn run<T, F, Fut>(
        &self,
        scope: &CancellationScope,
        what: &str,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState::default();
        loop {
            if let Err(e) = scope.check() {
                return RetryOutcome { result: Err(e), state };
            }
            state.attempt += 1;
            klog_debug!("{}: attempt {}/{}", what, state.attempt, self.max_attempts);

            let err = match op(state.attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        state,
                    }
                }
                Err(e) => e,
            };

            let message = err.to_string();
            state.last_error = Some(message.clone());
            if err.is_aborted() || !is_transient(&message) {
                klog_warn!("{}: permanent failure on attempt {}: {}", what, state.attempt, message);
                return RetryOutcome { result: Err(err), state };
            }
            if state.attempt >= self.max_attempts {
                klog_warn!("{}: giving up after {} attempts: {}", what, state.attempt, message);
                return RetryOutcome { result: Err(err), state };
            }

            state.delay = self.delay_for(state.attempt);
            klog_warn!(
                "{}: transient failure on attempt {} ({}), retrying in {:?}",
                what,
                state.attempt,
                message,
                state.delay
            );
            tokio::select! {
                _ = scope.cancelled() => {
                    return RetryOutcome { result: Err(scope.aborted()), state };
                }
                _ = tokio::time::sleep(state.delay) => {}
            }
        }
    }
}
