//! In-memory transports shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::models::LogEntry;
use crate::transport::Transport;

/// Transport that replays scripted results and records delivered batches.
///
/// Once the script is exhausted every call uses `fallback`.
pub struct FakeTransport {
    script: Mutex<VecDeque<bool>>,
    fallback_ok: bool,
    latency: Duration,
    calls: AtomicUsize,
    delivered: Mutex<Vec<Vec<LogEntry>>>,
}

impl FakeTransport {
    pub fn succeeding() -> Self {
        Self::with_script(Vec::new(), true)
    }

    pub fn failing() -> Self {
        Self::with_script(Vec::new(), false)
    }

    /// `true` entries succeed, `false` entries fail with a 503.
    pub fn with_script(script: Vec<bool>, fallback_ok: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback_ok,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Vec<LogEntry>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let ok = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback_ok);

        if ok {
            self.delivered.lock().unwrap().push(batch.to_vec());
            Ok(())
        } else {
            Err(TransportError::Status {
                code: StatusCode::SERVICE_UNAVAILABLE,
                message: "unavailable".to_string(),
            })
        }
    }
}
