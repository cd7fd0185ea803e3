//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{MusterError, Result};

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(MusterError::Timeout(duration.as_millis() as u64)),
    }
}

/// Like [`with_timeout`], but against a deadline shared by several steps.
///
/// `budget` is the full allowance the deadline was derived from and is what
/// a [`MusterError::Timeout`] reports.
pub async fn with_deadline<T>(
    deadline: Instant,
    budget: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(MusterError::Timeout(budget.as_millis() as u64)),
    }
}

/// Race a connect future against `duration`, reporting which server timed out.
pub async fn with_connect_timeout<T>(
    server: &str,
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(MusterError::ConnectionTimeout {
            server: server.to_string(),
            timeout_ms: duration.as_millis() as u64,
        }),
    }
}
