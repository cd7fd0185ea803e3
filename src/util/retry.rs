//! Retry with configurable backoff, bounded attempts and a total time budget.
//!
//! One [`RetryStrategy`] runs one retry sequence at a time: [`RetryStrategy::execute`]
//! takes `&mut self` and resets the attempt log on entry. Concurrent sequences
//! need their own instances, which are cheap to build from a shared
//! [`RetryConfig`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::backoff::RetryConfig;
use crate::error::{MusterError, Result};

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&MusterError) -> bool + Send + Sync>;

/// One failed attempt in a retry sequence.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: String,
    /// Delay scheduled before the next attempt (zero when none follows).
    pub delay: Duration,
    /// Time since the first attempt started.
    pub elapsed: Duration,
}

/// Executes fallible async operations under a [`RetryConfig`].
pub struct RetryStrategy {
    config: RetryConfig,
    is_recoverable: RetryPredicate,
    server: Option<String>,
    attempts: Vec<RetryAttempt>,
}

impl std::fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("config", &self.config)
            .field("server", &self.server)
            .field("attempts", &self.attempts.len())
            .finish()
    }
}

impl RetryStrategy {
    /// Build a strategy, validating the configuration eagerly.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            is_recoverable: Arc::new(MusterError::is_retryable),
            server: None,
            attempts: Vec::new(),
        })
    }

    /// Replace the default recoverability check.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&MusterError) -> bool + Send + Sync + 'static,
    {
        self.is_recoverable = Arc::new(predicate);
        self
    }

    /// Attach a server name to log lines and terminal errors.
    pub fn for_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Failed attempts recorded by the most recent `execute`.
    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    /// Run `operation` until it succeeds, the attempts run out, or the budget does.
    pub async fn execute<F, Fut, T>(&mut self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.attempts.clear();
        let started = Instant::now();
        let started_at = Utc::now();
        let max_attempts = self.config.max_attempts;
        let mut attempt: u32 = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            server = self.server.as_deref().unwrap_or_default(),
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let elapsed = started.elapsed();
            let recoverable = (self.is_recoverable)(&error);
            let last = !recoverable || attempt >= max_attempts;
            let delay = if last {
                Duration::ZERO
            } else {
                self.config.delay_for(attempt, &error)
            };
            self.record(attempt, &error, delay, elapsed);

            if !recoverable {
                tracing::warn!(
                    server = self.server.as_deref().unwrap_or_default(),
                    attempt,
                    error = %error,
                    "non-recoverable error, giving up"
                );
                return Err(self.exhausted(attempt, error));
            }
            if attempt >= max_attempts {
                tracing::error!(
                    server = self.server.as_deref().unwrap_or_default(),
                    attempt,
                    max_attempts,
                    error = %error,
                    "retry attempts exhausted"
                );
                return Err(self.exhausted(attempt, error));
            }
            if self.over_budget(elapsed) {
                return Err(self.timed_out(started_at, elapsed, attempt));
            }

            tracing::warn!(
                server = self.server.as_deref().unwrap_or_default(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after error"
            );

            let sleep_for = match self.config.max_total_time {
                Some(budget) => delay.min(budget.saturating_sub(elapsed)),
                None => delay,
            };
            tokio::time::sleep(sleep_for).await;

            let elapsed = started.elapsed();
            if self.over_budget(elapsed) {
                return Err(self.timed_out(started_at, elapsed, attempt));
            }
            attempt += 1;
        }
    }

    fn record(&mut self, attempt: u32, error: &MusterError, delay: Duration, elapsed: Duration) {
        self.attempts.push(RetryAttempt {
            attempt,
            timestamp: Utc::now(),
            error: error.to_string(),
            delay,
            elapsed,
        });
    }

    fn over_budget(&self, elapsed: Duration) -> bool {
        self.config
            .max_total_time
            .is_some_and(|budget| elapsed >= budget)
    }

    fn exhausted(&self, attempts: u32, last_error: MusterError) -> MusterError {
        MusterError::RetryExhausted {
            server: self.server.clone(),
            attempts,
            last_error: Box::new(last_error),
            history: self.attempts.clone(),
        }
    }

    fn timed_out(&self, started_at: DateTime<Utc>, elapsed: Duration, attempts: u32) -> MusterError {
        let budget = self.config.max_total_time.unwrap_or_default();
        tracing::warn!(
            server = self.server.as_deref().unwrap_or_default(),
            attempts,
            budget_ms = budget.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "retry budget exceeded"
        );
        MusterError::RecoveryTimeout {
            server: self.server.clone(),
            budget_ms: budget.as_millis() as u64,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
        }
    }
}
