//! Retry/send pipeline: delivers one drained batch through the transport.
//!
//! Each attempt goes through the circuit breaker. Transport failures are
//! retried with exponential backoff; an open breaker ends the cycle at once.
//! Nothing is returned as an error to the flusher: every outcome is a
//! [`FlushOutcome`] and is reflected in the metrics.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::LogTideError;
use crate::metrics::MetricsRecorder;
use crate::models::{CircuitState, LogEntry};
use crate::transport::Transport;

/// Result of one flush cycle.
#[derive(Debug)]
pub enum FlushOutcome {
    /// The buffer was empty, nothing was sent
    Empty,

    /// The batch of this many entries was delivered
    Sent(usize),

    /// The batch was abandoned; `reason` is `CircuitOpen` or `RetriesExhausted`
    Dropped { count: usize, reason: LogTideError },
}

impl FlushOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, FlushOutcome::Sent(_))
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, FlushOutcome::Dropped { .. })
    }
}

/// Counts a batch as dropped if its send future is dropped before an outcome.
struct InFlightBatch<'a> {
    metrics: &'a MetricsRecorder,
    count: usize,
    settled: bool,
}

impl InFlightBatch<'_> {
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(batch_size = self.count, "Send abandoned, dropping batch");
            self.metrics.record_dropped(self.count);
        }
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Sends batches with retry, breaker gating and metrics accounting.
pub struct SendPipeline<T> {
    transport: T,
    breaker: CircuitBreaker,
    metrics: MetricsRecorder,
    max_retries: u32,
    retry_delay: Duration,
}

impl<T: Transport> SendPipeline<T> {
    pub fn new(
        transport: T,
        breaker: CircuitBreaker,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            breaker,
            metrics: MetricsRecorder::new(),
            max_retries,
            retry_delay,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Deliver `batch`, retrying transport failures up to `max_retries` times.
    ///
    /// Blocks only the calling task, including during backoff sleeps.
    pub async fn send(&self, batch: Vec<LogEntry>) -> FlushOutcome {
        let count = batch.len();
        if count == 0 {
            return FlushOutcome::Empty;
        }

        let mut in_flight = InFlightBatch {
            metrics: &self.metrics,
            count,
            settled: false,
        };
        let mut attempt: u32 = 0;
        let outcome = loop {
            let started = Instant::now();
            let result = self
                .breaker
                .call(|| async {
                    self.transport
                        .send(&batch)
                        .await
                        .map_err(LogTideError::from)
                })
                .await;

            match result {
                Ok(()) => {
                    let latency = started.elapsed();
                    self.metrics.record_latency(latency);
                    self.metrics.record_sent(count);
                    debug!(
                        batch_size = count,
                        latency_ms = latency.as_millis() as u64,
                        "Sent log batch"
                    );
                    break FlushOutcome::Sent(count);
                }
                Err(LogTideError::CircuitOpen) => {
                    warn!(batch_size = count, "Circuit breaker open, dropping batch");
                    self.metrics.record_dropped(count);
                    break FlushOutcome::Dropped {
                        count,
                        reason: LogTideError::CircuitOpen,
                    };
                }
                Err(e) => {
                    attempt += 1;
                    self.metrics.record_error();

                    if attempt > self.max_retries {
                        error!(
                            error = %e,
                            attempts = attempt,
                            batch_size = count,
                            "Failed to send log batch, dropping"
                        );
                        self.metrics.record_dropped(count);
                        break FlushOutcome::Dropped {
                            count,
                            reason: LogTideError::RetriesExhausted {
                                attempts: attempt,
                                last_error: e.to_string(),
                            },
                        };
                    }

                    self.metrics.record_retry();
                    let delay = backoff_delay(self.retry_delay, attempt);
                    warn!(
                        error = %e,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        in_flight.settle();

        if self.breaker.state() == CircuitState::Open {
            self.metrics.record_breaker_trip();
        }
        outcome
    }
}
