//! Backoff configuration and delay computation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{MusterError, Result};

/// Caller-supplied delay function of `(attempt, error)`.
pub type CustomDelayFn = Arc<dyn Fn(u32, &MusterError) -> Duration + Send + Sync>;

/// Delay algorithm between attempts.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// No delay.
    Immediate,
    /// Constant `base_delay`.
    Fixed,
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`.
    Exponential,
    /// Caller-supplied function.
    Custom(CustomDelayFn),
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Fixed => f.write_str("Fixed"),
            Self::Linear => f.write_str("Linear"),
            Self::Exponential => f.write_str("Exponential"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay fed into the strategy.
    pub base_delay: Duration,
    /// Upper bound for any computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor for [`BackoffStrategy::Exponential`].
    pub multiplier: f64,
    /// Symmetric jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter: f64,
    /// Budget for the whole retry sequence.
    pub max_total_time: Option<Duration>,
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential_with_jitter()
    }
}

impl RetryConfig {
    /// Exponential backoff with 10% jitter: 5 attempts, 1s doubling to 30s.
    pub fn exponential_with_jitter() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_total_time: Some(Duration::from_secs(120)),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Linear backoff: 3 attempts, 1s steps up to 10s.
    pub fn linear() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: 0.0,
            max_total_time: None,
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Fixed delay: 3 attempts, 2s apart.
    pub fn fixed() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            multiplier: 1.0,
            jitter: 0.0,
            max_total_time: None,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Retry right away: 3 attempts, no delay.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_total_time: None,
            strategy: BackoffStrategy::Immediate,
        }
    }

    /// Low-latency exponential preset for tests: 10ms doubling to 100ms, 1s budget.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_total_time: Some(Duration::from_secs(1)),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Fully custom delay function; bounds default to 3 attempts and a 30s cap.
    pub fn custom<F>(max_attempts: u32, delay: F) -> Self
    where
        F: Fn(u32, &MusterError) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter: 0.0,
            max_total_time: None,
            strategy: BackoffStrategy::Custom(Arc::new(delay)),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_total_time(mut self, budget: Option<Duration>) -> Self {
        self.max_total_time = budget;
        self
    }

    /// Reject configurations that cannot produce a sane retry sequence.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MusterError::Configuration(
                "retry max_attempts must be greater than zero".into(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(MusterError::Configuration(format!(
                "retry max_delay ({}ms) must be >= base_delay ({}ms)",
                self.max_delay.as_millis(),
                self.base_delay.as_millis()
            )));
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(MusterError::Configuration(format!(
                "retry multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(MusterError::Configuration(format!(
                "retry jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Delay after failed `attempt` (1-based), capped at `max_delay`, before jitter.
    pub fn base_delay_for(&self, attempt: u32, error: &MusterError) -> Duration {
        let attempt = attempt.max(1);
        let raw = match &self.strategy {
            BackoffStrategy::Immediate => Duration::ZERO,
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
                duration_from_nanos_f64(nanos, self.max_delay)
            }
            BackoffStrategy::Custom(delay) => delay(attempt, error),
        };
        raw.min(self.max_delay)
    }

    /// Delay after failed `attempt`, including jitter.
    pub fn delay_for(&self, attempt: u32, error: &MusterError) -> Duration {
        apply_jitter(self.base_delay_for(attempt, error), self.jitter)
    }
}

fn duration_from_nanos_f64(nanos: f64, ceiling: Duration) -> Duration {
    if !nanos.is_finite() || nanos >= ceiling.as_nanos() as f64 {
        return ceiling;
    }
    Duration::from_nanos(nanos.max(0.0).round() as u64)
}

/// Add or subtract up to `jitter * delay`, floored at zero and saturating at `Duration::MAX`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }
    let scale: f64 = rand::rng().random_range(-jitter..=jitter);
    let adjusted = delay.as_secs_f64() * (1.0 + scale);
    Duration::try_from_secs_f64(adjusted.max(0.0)).unwrap_or(Duration::MAX)
}
