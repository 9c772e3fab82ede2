//! The LogTide client: leveled logging, buffering and delivery.
//!
//! Logging calls attach the trace id and global metadata, then append to the
//! bounded buffer. When the buffer reaches `batch_size` the calling task waits
//! for a flush before returning; a background task flushes every
//! `flush_interval`. Flushes run on their own tracked tasks, so a cancelled
//! caller never strands a drained batch, and `close` waits for all of them.
//! Delivery failures never surface from logging calls, only through
//! [`ClientMetrics`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::buffer::{BufferConfig, BufferStats, LogBuffer};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ClientOptions, ConfigError};
use crate::error::{LogTideError, TransportError};
use crate::models::{
    error_metadata, AggregatedStatsOptions, AggregatedStatsResponse, CircuitState, ClientMetrics,
    LogEntry, LogLevel, LogsResponse, Metadata, QueryOptions,
};
use crate::pipeline::{FlushOutcome, SendPipeline};
use crate::scheduler::FlushScheduler;
use crate::trace_context::{generate_trace_id, TraceContext};
use crate::transport::{HttpTransport, Transport};

/// State shared between the client handle and the flush task.
struct ClientInner<T> {
    options: ClientOptions,
    buffer: LogBuffer,
    pipeline: SendPipeline<T>,
    trace: TraceContext,
    closed: AtomicBool,
    flushes: TaskTracker,
}

type TakeBatch = fn(&LogBuffer) -> Option<Vec<LogEntry>>;

impl<T: Transport> ClientInner<T> {
    /// Take a batch from the buffer and push it through the pipeline.
    async fn flush_cycle(&self, take: TakeBatch) -> FlushOutcome {
        match take(&self.buffer) {
            Some(batch) => self.pipeline.send(batch).await,
            None => FlushOutcome::Empty,
        }
    }

    /// Run a flush cycle on a tracked task and wait for its outcome.
    ///
    /// Cancelling the caller detaches the task; it still completes and
    /// updates the metrics.
    async fn spawn_flush(self: &Arc<Self>, take: TakeBatch) -> FlushOutcome {
        let inner = Arc::clone(self);
        let handle = self
            .flushes
            .spawn(async move { inner.flush_cycle(take).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Flush task failed");
                FlushOutcome::Empty
            }
        }
    }
}

/// Buffered, retrying client for the LogTide API.
///
/// # Example
///
/// ```no_run
/// use logtide_client::{ClientOptions, LogTideClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), logtide_client::LogTideError> {
///     let client = LogTideClient::new(ClientOptions::new("http://localhost:8080", "lp_key"))?;
///
///     client.info("api", "Server started", None).await?;
///     client
///         .with_trace_id_async("request-123", async {
///             client.info("api", "Handling request", None).await
///         })
///         .await?;
///
///     client.close().await;
///     println!("{:?}", client.get_metrics());
///     Ok(())
/// }
/// ```
pub struct LogTideClient<T: Transport = HttpTransport> {
    inner: Arc<ClientInner<T>>,
    scheduler: Option<FlushScheduler>,
}

impl LogTideClient<HttpTransport> {
    /// Create a client that ships logs over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `LogTideError::Config` for invalid options (or when a flush
    /// interval is set outside a tokio runtime) and `LogTideError::Transport`
    /// if the HTTP client cannot be built.
    pub fn new(options: ClientOptions) -> Result<Self, LogTideError> {
        let transport = HttpTransport::new(&options)?;
        Self::with_transport(options, transport)
    }

    /// Query stored logs.
    pub async fn query(&self, options: &QueryOptions) -> Result<LogsResponse, TransportError> {
        self.transport().query(options).await
    }

    /// Fetch all logs sharing a trace id.
    pub async fn get_by_trace_id(
        &self,
        trace_id: &str,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        self.transport().get_by_trace_id(trace_id).await
    }

    /// Fetch aggregated statistics.
    pub async fn get_aggregated_stats(
        &self,
        options: &AggregatedStatsOptions,
    ) -> Result<AggregatedStatsResponse, TransportError> {
        self.transport().get_aggregated_stats(options).await
    }

    /// Follow the live log stream, calling `on_log` for every event.
    pub async fn stream<F>(&self, filters: &[(&str, &str)], on_log: F) -> Result<(), TransportError>
    where
        F: FnMut(serde_json::Value) + Send,
    {
        self.transport().stream(filters, on_log).await
    }
}

impl<T: Transport> LogTideClient<T> {
    /// Create a client delivering through `transport`.
    ///
    /// Starts the background flush task when `flush_interval` is non-zero,
    /// which requires a running tokio runtime.
    pub fn with_transport(options: ClientOptions, transport: T) -> Result<Self, LogTideError> {
        options.validate()?;

        let breaker = CircuitBreaker::new(
            options.circuit_breaker_threshold,
            options.circuit_breaker_reset_timeout,
        );
        let inner = Arc::new(ClientInner {
            buffer: LogBuffer::new(BufferConfig::new(
                options.batch_size,
                options.max_buffer_size,
            )),
            pipeline: SendPipeline::new(
                transport,
                breaker,
                options.max_retries,
                options.retry_delay,
            ),
            trace: TraceContext::new(),
            closed: AtomicBool::new(false),
            flushes: TaskTracker::new(),
            options,
        });

        let scheduler = if inner.options.flush_interval.is_zero() {
            None
        } else {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(ConfigError::new(
                    "a non-zero flush interval requires a running tokio runtime",
                )
                .into());
            }
            let task_inner = Arc::clone(&inner);
            Some(FlushScheduler::spawn(
                inner.options.flush_interval,
                move || {
                    let inner = Arc::clone(&task_inner);
                    async move {
                        inner.flush_cycle(LogBuffer::drain).await;
                    }
                },
            ))
        };

        info!(
            api_url = %inner.options.api_url,
            batch_size = inner.options.batch_size,
            flush_interval_ms = inner.options.flush_interval.as_millis() as u64,
            "LogTide client initialized"
        );

        Ok(Self { inner, scheduler })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn transport(&self) -> &T {
        self.inner.pipeline.transport()
    }

    /// Set the shared trace id for subsequent logs, or clear it with `None`.
    ///
    /// Scoped ids from the `with_*trace_id*` methods take precedence.
    pub fn set_trace_id(&self, trace_id: Option<&str>) {
        self.inner.trace.set(trace_id.map(str::to_string));
    }

    pub fn get_trace_id(&self) -> Option<String> {
        self.inner.trace.get()
    }

    /// Run `body` with `trace_id` current on this thread, restoring the
    /// previous id afterwards.
    pub fn with_trace_id<R>(&self, trace_id: impl Into<String>, body: impl FnOnce() -> R) -> R {
        self.inner.trace.with_trace_id(trace_id, body)
    }

    /// Run `body` under a freshly generated trace id.
    pub fn with_new_trace_id<R>(&self, body: impl FnOnce() -> R) -> R {
        self.inner.trace.with_new_trace_id(body)
    }

    /// Await `body` with `trace_id` current for this task only, restoring the
    /// previous id on completion, error or cancellation.
    pub async fn with_trace_id_async<F>(&self, trace_id: impl Into<String>, body: F) -> F::Output
    where
        F: Future,
    {
        self.inner.trace.scope(trace_id, body).await
    }

    /// Await `body` under a freshly generated trace id.
    pub async fn with_new_trace_id_async<F>(&self, body: F) -> F::Output
    where
        F: Future,
    {
        self.inner.trace.scope(generate_trace_id(), body).await
    }

    /// Enqueue a custom entry.
    ///
    /// # Errors
    ///
    /// `BufferFull` when the buffer is at capacity (the entry is counted as
    /// dropped) and `Closed` after [`close`](Self::close).
    pub async fn log(&self, mut entry: LogEntry) -> Result<(), LogTideError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(LogTideError::Closed);
        }

        if entry.trace_id.is_none() {
            entry.trace_id = if inner.options.auto_trace_id {
                Some(generate_trace_id())
            } else {
                inner.trace.get()
            };
        }

        if !inner.options.global_metadata.is_empty() {
            let mut merged = inner.options.global_metadata.clone();
            merged.extend(std::mem::take(&mut entry.metadata));
            entry.metadata = merged;
        }

        match inner.buffer.append(entry) {
            Ok(batch_ready) => {
                if batch_ready {
                    inner.spawn_flush(LogBuffer::drain).await;
                }
                Ok(())
            }
            Err(LogTideError::BufferFull) => {
                inner.pipeline.metrics().record_dropped(1);
                warn!(
                    max_buffer_size = inner.options.max_buffer_size,
                    "Buffer full, dropping log"
                );
                Err(LogTideError::BufferFull)
            }
            Err(e) => Err(e),
        }
    }

    async fn log_level(
        &self,
        level: LogLevel,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        let entry = LogEntry::new(service, level, message).with_metadata(metadata.unwrap_or_default());
        self.log(entry).await
    }

    pub async fn debug(
        &self,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        self.log_level(LogLevel::Debug, service, message, metadata).await
    }

    pub async fn info(
        &self,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        self.log_level(LogLevel::Info, service, message, metadata).await
    }

    pub async fn warn(
        &self,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        self.log_level(LogLevel::Warn, service, message, metadata).await
    }

    pub async fn error(
        &self,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        self.log_level(LogLevel::Error, service, message, metadata).await
    }

    pub async fn critical(
        &self,
        service: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), LogTideError> {
        self.log_level(LogLevel::Critical, service, message, metadata).await
    }

    /// Log at `error` level with `err` serialized under the `error` key.
    pub async fn error_from<E>(&self, service: &str, message: &str, err: &E) -> Result<(), LogTideError>
    where
        E: std::error::Error + ?Sized,
    {
        self.log_level(LogLevel::Error, service, message, Some(error_metadata(err)))
            .await
    }

    /// Log at `critical` level with `err` serialized under the `error` key.
    pub async fn critical_from<E>(
        &self,
        service: &str,
        message: &str,
        err: &E,
    ) -> Result<(), LogTideError>
    where
        E: std::error::Error + ?Sized,
    {
        self.log_level(LogLevel::Critical, service, message, Some(error_metadata(err)))
            .await
    }

    /// Send everything currently buffered. A no-op after `close`.
    pub async fn flush(&self) -> FlushOutcome {
        if self.inner.closed.load(Ordering::SeqCst) {
            return FlushOutcome::Empty;
        }
        self.inner.spawn_flush(LogBuffer::drain).await
    }

    /// Stop the background flush and send what is left. Idempotent.
    ///
    /// The buffer stops accepting entries in the same step that takes the
    /// final batch. Returns once every flush started so far has finished.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }

        let outcome = self.inner.spawn_flush(LogBuffer::close).await;
        self.inner.flushes.close();
        self.inner.flushes.wait().await;
        info!(final_flush = ?outcome, "LogTide client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn get_metrics(&self) -> ClientMetrics {
        self.inner.pipeline.metrics().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.pipeline.metrics().reset();
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitState {
        self.inner.pipeline.breaker().state()
    }

    /// Entries waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.inner.buffer.stats()
    }

    #[cfg(test)]
    fn buffered(&self) -> Vec<LogEntry> {
        self.inner.buffer.snapshot()
    }
}

impl<T: Transport> Drop for LogTideClient<T> {
    fn drop(&mut self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel();
        }
        if !self.is_closed() {
            let pending = self.inner.buffer.len();
            if pending > 0 {
                warn!(
                    pending = pending,
                    "LogTide client dropped without close, buffered logs discarded"
                );
            }
        }
    }
}
