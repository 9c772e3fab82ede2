//! Transport layer between the client core and the LogTide HTTP API.
//!
//! The send pipeline only depends on the [`Transport`] trait. [`HttpTransport`]
//! is the production implementation and also carries the read-only query,
//! statistics and streaming endpoints, which bypass retries and the breaker.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ClientOptions;
use crate::error::TransportError;
use crate::models::{
    AggregatedStatsOptions, AggregatedStatsResponse, LogEntry, LogsResponse, QueryOptions,
};

/// Delivers a batch of entries, all-or-nothing.
///
/// Implementations must bound each call with a timeout.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), TransportError>;
}

/// Replaces the per-request timeout for the long-lived event stream.
const STREAM_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Serialize)]
struct IngestRequest<'a> {
    logs: &'a [LogEntry],
}

/// reqwest-backed transport for the LogTide API.
///
/// The inner client is reused across calls for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for the endpoint and timeout in `options`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Build` if the HTTP client cannot be built.
    pub fn new(options: &ClientOptions) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            client,
            api_url: options.api_url.clone(),
            api_key: options.api_key.clone(),
            timeout: options.request_timeout,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }

    /// Turn a non-success response into `TransportError::Status`.
    async fn check_status(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(TransportError::Status {
            code: status,
            message,
        })
    }

    /// Query stored logs with filters.
    pub async fn query(&self, options: &QueryOptions) -> Result<LogsResponse, TransportError> {
        let response = self
            .authorized(self.client.get(self.url("/api/logs")))
            .query(&options.to_params())
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch every log carrying `trace_id`.
    pub async fn get_by_trace_id(
        &self,
        trace_id: &str,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        let path = format!("/api/logs/trace/{}", trace_id);
        let response = self
            .authorized(self.client.get(self.url(&path)))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch time-bucketed statistics.
    pub async fn get_aggregated_stats(
        &self,
        options: &AggregatedStatsOptions,
    ) -> Result<AggregatedStatsResponse, TransportError> {
        let response = self
            .authorized(self.client.get(self.url("/api/logs/stats")))
            .query(&options.to_params())
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Follow the Server-Sent Events log stream until the server closes it.
    ///
    /// Each `data:` line is decoded as JSON and handed to `on_log`. Lines that
    /// fail to decode are logged and skipped. The connection is held for up to
    /// 24 hours instead of the request timeout.
    pub async fn stream<F>(
        &self,
        filters: &[(&str, &str)],
        mut on_log: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(serde_json::Value) + Send,
    {
        let response = self
            .authorized(self.client.get(self.url("/api/logs/stream")))
            .timeout(STREAM_TIMEOUT)
            .query(filters)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut pending = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                dispatch_sse_line(line.trim_end_matches(['\r', '\n']), &mut on_log);
            }
        }

        if !pending.is_empty() {
            dispatch_sse_line(pending.trim_end(), &mut on_log);
        }
        Ok(())
    }
}

fn dispatch_sse_line<F>(line: &str, on_log: &mut F)
where
    F: FnMut(serde_json::Value),
{
    let Some(data) = line.strip_prefix("data:") else {
        return;
    };
    match serde_json::from_str(data.trim_start()) {
        Ok(value) => on_log(value),
        Err(e) => warn!(error = %e, "Skipping malformed stream event"),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[LogEntry]) -> Result<(), TransportError> {
        debug!(
            batch_size = batch.len(),
            url = %self.api_url,
            "Sending log batch"
        );

        let response = self
            .authorized(self.client.post(self.url("/api/logs")))
            .json(&IngestRequest { logs: batch })
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
