//! Delivery counters and rolling send latency.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::ClientMetrics;

/// Number of successful sends kept for the latency average.
pub const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct MetricsState {
    metrics: ClientMetrics,
    latencies: VecDeque<f64>,
}

/// Thread-safe recorder behind [`ClientMetrics`] snapshots.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<MetricsState>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_sent(&self, count: usize) {
        self.lock().metrics.logs_sent += count as u64;
    }

    pub fn record_dropped(&self, count: usize) {
        self.lock().metrics.logs_dropped += count as u64;
    }

    pub fn record_error(&self) {
        self.lock().metrics.errors += 1;
    }

    pub fn record_retry(&self) {
        self.lock().metrics.retries += 1;
    }

    pub fn record_breaker_trip(&self) {
        self.lock().metrics.circuit_breaker_trips += 1;
    }

    /// Add a successful send latency, evicting the oldest beyond the window.
    pub fn record_latency(&self, latency: Duration) {
        let mut state = self.lock();
        state.latencies.push_back(latency.as_secs_f64() * 1000.0);
        while state.latencies.len() > LATENCY_WINDOW {
            state.latencies.pop_front();
        }
        let total: f64 = state.latencies.iter().sum();
        state.metrics.avg_latency_ms = total / state.latencies.len() as f64;
    }

    /// Owned copy of the current counters.
    pub fn snapshot(&self) -> ClientMetrics {
        self.lock().metrics.clone()
    }

    /// Zero all counters and clear the latency window.
    pub fn reset(&self) {
        *self.lock() = MetricsState::default();
    }
}
