//! Circuit breaker gating send attempts to the ingestion API.
//!
//! # State Transitions
//! ```text
//! Closed → Open:      failure_count >= threshold
//! Open → HalfOpen:    reset_timeout elapsed since the last failure (checked on read)
//! HalfOpen → Closed:  a success is recorded
//! HalfOpen → Open:    failures reach the threshold again
//! ```
//!
//! State, failure count and last failure time live behind one mutex so a read
//! never observes a half-applied transition.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LogTideError;
use crate::models::CircuitState;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
        }
    }

    /// Lazy Open → HalfOpen transition.
    fn check_half_open(&mut self, reset_timeout: Duration) {
        if self.state != CircuitState::Open {
            return;
        }
        let elapsed = self
            .last_failure_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= reset_timeout {
            debug!("Circuit breaker half-open, allowing probe");
            self.state = CircuitState::HalfOpen;
            self.failure_count = 0;
        }
    }
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker that opens after `threshold` consecutive failures.
    ///
    /// A `threshold` of 0 opens on the first failure, the same as 1.
    /// [`ClientOptions::validate`](crate::ClientOptions::validate) rejects it.
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // A poisoned guard still holds a consistent triple: every mutation is a
        // plain field assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, after applying any pending Open → HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        inner.check_half_open(self.reset_timeout);
        inner.state
    }

    /// Consecutive failures since the last success or half-open transition.
    pub fn failure_count(&self) -> u32 {
        let mut inner = self.lock();
        inner.check_half_open(self.reset_timeout);
        inner.failure_count
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            debug!("Circuit breaker closed after successful probe");
            inner.state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        if inner.failure_count >= self.threshold && inner.state != CircuitState::Open {
            warn!(
                failure_count = inner.failure_count,
                threshold = self.threshold,
                reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            inner.state = CircuitState::Open;
        }
    }

    /// Run `op` under breaker protection.
    ///
    /// Fails with [`LogTideError::CircuitOpen`] without invoking `op` when the
    /// breaker is open; otherwise records the outcome and returns it unchanged.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, LogTideError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LogTideError>>,
    {
        if self.state() == CircuitState::Open {
            return Err(LogTideError::CircuitOpen);
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_threshold_opens_on_first_failure() {
        let breaker = CircuitBreaker::new(0, Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_rejects_when_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();

        let invoked = AtomicUsize::new(0);
        let result: Result<(), _> = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(LogTideError::CircuitOpen)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_records_outcomes() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));

        let result: Result<u32, _> = breaker
            .call(|| async { Err(TransportError::Timeout.into()) })
            .await;
        assert!(matches!(
            result,
            Err(LogTideError::Transport(TransportError::Timeout))
        ));
        assert_eq!(breaker.failure_count(), 1);

        let result = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(1_000, Duration::from_secs(30)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.failure_count(), 800);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
