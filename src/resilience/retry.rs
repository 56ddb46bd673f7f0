use super::circuit::CircuitBreaker;
use crate::errors::{AutomationError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retries with exponential backoff, optionally guarded by a
/// shared [`CircuitBreaker`].
///
/// The policy does not look at the error kind: every `Err` is retried until
/// the attempts run out, then the last error is returned as-is.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            breaker: None,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Delay slept after the failed attempt number `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<AutomationError> = None;

        for attempt in 0..self.max_attempts {
            if let Some(breaker) = &self.breaker {
                if !breaker.try_acquire() {
                    warn!(
                        operation = label,
                        breaker = breaker.name(),
                        attempt = attempt + 1,
                        "Circuit open, failing fast"
                    );
                    return Err(last_error
                        .unwrap_or_else(|| AutomationError::CircuitOpen(label.to_string())));
                }
            }

            match operation().await {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    if attempt > 0 {
                        debug!(operation = label, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_failure();
                    }
                    let remaining = self.max_attempts - attempt - 1;
                    if remaining == 0 {
                        warn!(
                            operation = label,
                            attempts = self.max_attempts,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AutomationError::CircuitOpen(label.to_string())))
    }
}
