//! LogTide client library
//!
//! Ships structured log entries to a LogTide server in batches:
//!
//! - **client**: leveled logging API, trace scopes, flush and close
//! - **buffer**: bounded in-memory queue with a batch threshold
//! - **pipeline**: retry with exponential backoff, gated by the circuit breaker
//! - **circuit_breaker**: three-state breaker around the transport
//! - **scheduler**: background time-based flush
//! - **transport**: `Transport` trait and the reqwest-backed HTTP transport
//! - **config**: client options, from code or `LOGTIDE_*` environment variables
//!
//! # Example
//!
//! ```no_run
//! use logtide_client::{ClientOptions, LogTideClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ClientOptions::from_env().expect("Failed to load options");
//!     let client = LogTideClient::new(options).expect("Failed to create client");
//!
//!     client.info("api-gateway", "Request received", None).await.ok();
//!
//!     let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
//!     client.error_from("api-gateway", "Upstream call failed", &err).await.ok();
//!
//!     client.close().await;
//! }
//! ```

pub mod buffer;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod trace_context;
pub mod transport;

#[cfg(test)]
mod testing;

pub use buffer::{BufferConfig, BufferStats, LogBuffer};
pub use circuit_breaker::CircuitBreaker;
pub use client::LogTideClient;
pub use config::{ClientOptions, ConfigError};
pub use error::{LogTideError, TransportError};
pub use models::{
    AggregatedStatsOptions, AggregatedStatsResponse, CircuitState, ClientMetrics, LogEntry,
    LogLevel, LogsResponse, Metadata, QueryOptions,
};
pub use pipeline::FlushOutcome;
pub use trace_context::{generate_trace_id, TraceContext};
pub use transport::{HttpTransport, Transport};
