//! Connection counters shared by both strategies.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Snapshot of a strategy's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatistics {
    pub total_operations: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub connection_errors: u64,
    /// Mean latency of successful connects.
    pub average_connection_time_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    stats: ConnectionStatistics,
    timed_samples: u64,
}

/// Counters behind a short synchronous lock. Never held across an await.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<Counters>,
}

impl StatsRecorder {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn operation_started(&self) {
        self.lock().stats.total_operations += 1;
    }

    /// A new connection was opened and is now live.
    pub(crate) fn connection_opened(&self, elapsed: Duration) {
        let mut counters = self.lock();
        counters.stats.total_connections += 1;
        counters.stats.active_connections += 1;
        Self::add_sample(&mut counters, elapsed);
    }

    /// A connection request succeeded without opening anything new.
    pub(crate) fn connection_timed(&self, elapsed: Duration) {
        Self::add_sample(&mut self.lock(), elapsed);
    }

    pub(crate) fn connection_closed(&self) {
        let mut counters = self.lock();
        counters.stats.active_connections = counters.stats.active_connections.saturating_sub(1);
    }

    pub(crate) fn connection_failed(&self) {
        self.lock().stats.connection_errors += 1;
    }

    fn add_sample(counters: &mut Counters, elapsed: Duration) {
        counters.timed_samples += 1;
        let sample = elapsed.as_secs_f64() * 1_000.0;
        let avg = counters.stats.average_connection_time_ms;
        counters.stats.average_connection_time_ms =
            avg + (sample - avg) / counters.timed_samples as f64;
    }

    pub(crate) fn snapshot(&self) -> ConnectionStatistics {
        self.lock().stats
    }

    pub(crate) fn reset(&self) {
        *self.lock() = Counters::default();
    }
}
