//! Retry policy
//!
//! A standalone policy object: a retryable-error predicate, an attempt
//! budget, and a fixed delay, decoupled from the code that runs under it.
//! Only network-class failures are worth retrying; every other class fails
//! on first occurrence without consuming budget.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::providers::trait_::ProviderError;

/// Failure classes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    ProviderConfig,
    TransientNetwork,
    Permission,
    NotFound,
    Unknown,
}

/// Classify a provider failure.
///
/// Only failures where the request never completed count as transient; an
/// HTTP response, however unpleasant, means the provider is reachable and a
/// retry would repeat the same outcome.
pub fn classify(err: &ProviderError) -> ErrorClass {
    match err {
        ProviderError::Network { .. } => ErrorClass::TransientNetwork,
        ProviderError::NotFound { .. } => ErrorClass::NotFound,
        ProviderError::NotConfigured { .. } => ErrorClass::ProviderConfig,
        ProviderError::Http { status, .. } => match status {
            401 | 403 => ErrorClass::Permission,
            404 => ErrorClass::NotFound,
            _ => ErrorClass::Unknown,
        },
        ProviderError::Malformed { .. } | ProviderError::Unknown { .. } => ErrorClass::Unknown,
    }
}

/// Progress report emitted between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProgress {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Outcome of running an operation under the policy.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    /// Attempts actually spent, including the final one.
    pub attempts: u32,
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failure is worth another attempt.
    pub fn is_retryable(&self, err: &ProviderError) -> bool {
        classify(err) == ErrorClass::TransientNetwork
    }

    /// Run `operation` under the policy. `on_progress` fires before each
    /// retry wait so callers can surface "attempt N of M" feedback.
    pub async fn run<T, F, Fut, P>(
        &self,
        op_name: &str,
        mut on_progress: P,
        operation: F,
    ) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        P: FnMut(RetryProgress),
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) if self.is_retryable(&err) && attempt < self.max_attempts => {
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    counter!("lifecycle_retry_attempts_total").increment(1);
                    on_progress(RetryProgress {
                        attempt,
                        max_attempts: self.max_attempts,
                    });
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
