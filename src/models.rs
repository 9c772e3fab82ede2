//! Data model shared by the client, the send pipeline and the HTTP transport.
//!
//! Everything here serializes to the JSON shapes the LogTide API accepts and
//! returns.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Structured metadata attached to a log entry.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Log severity levels accepted by the ingestion API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Get all possible log levels, lowest severity first.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// A single log entry as shipped to the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Name of the service that produced the entry
    pub service: String,

    /// Log severity level
    pub level: LogLevel,

    /// Log message content
    pub message: String,

    /// RFC 3339 UTC timestamp, assigned at creation
    pub time: String,

    /// Additional structured metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Correlation identifier
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current time.
    pub fn new(service: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            level,
            message: message.into(),
            time: format_timestamp(Utc::now()),
            metadata: Metadata::new(),
            trace_id: None,
        }
    }

    /// Add metadata to the log entry.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach an explicit trace id, bypassing the client's trace context.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Override the creation timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = format_timestamp(time);
        self
    }
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serialize an error into the `{"error": {...}}` metadata shape.
///
/// `stack` carries the `source()` chain, outermost cause first.
pub fn error_metadata<E>(err: &E) -> Metadata
where
    E: std::error::Error + ?Sized,
{
    let name = std::any::type_name::<E>()
        .rsplit("::")
        .next()
        .unwrap_or("Error")
        .to_string();

    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    let mut metadata = Metadata::new();
    metadata.insert(
        "error".to_string(),
        serde_json::json!({
            "name": name,
            "message": err.to_string(),
            "stack": chain.join("\ncaused by: "),
        }),
    );
    metadata
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time copy of the client's delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientMetrics {
    /// Entries delivered successfully
    pub logs_sent: u64,

    /// Entries rejected at enqueue or abandoned by the send pipeline
    pub logs_dropped: u64,

    /// Failed transport attempts
    pub errors: u64,

    /// Retries scheduled after a failed attempt
    pub retries: u64,

    /// Average of the last 100 successful send latencies
    pub avg_latency_ms: f64,

    /// Drain cycles that ended with the breaker open
    pub circuit_breaker_trips: u64,
}

/// Filters for `GET /api/logs`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub service: Option<String>,
    pub level: Option<LogLevel>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
    /// Full-text search
    pub q: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            service: None,
            level: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
            q: None,
        }
    }
}

impl QueryOptions {
    /// Render the options as query-string pairs, omitting unset filters.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(service) = &self.service {
            params.push(("service", service.clone()));
        }
        if let Some(level) = self.level {
            params.push(("level", level.to_string()));
        }
        if let Some(q) = &self.q {
            params.push(("q", q.clone()));
        }
        if let Some(from) = self.from {
            params.push(("from", from.to_rfc3339()));
        }
        if let Some(to) = self.to {
            params.push(("to", to.to_rfc3339()));
        }
        params
    }
}

/// Response from the logs query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,

    #[serde(default)]
    pub total: u64,
}

/// Options for `GET /api/logs/stats`.
#[derive(Debug, Clone)]
pub struct AggregatedStatsOptions {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Bucket width: `1m`, `5m`, `1h` or `1d`
    pub interval: String,
    pub service: Option<String>,
}

impl AggregatedStatsOptions {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            interval: "1h".to_string(),
            service: None,
        }
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("from", self.from.to_rfc3339()),
            ("to", self.to.to_rfc3339()),
            ("interval", self.interval.clone()),
        ];
        if let Some(service) = &self.service {
            params.push(("service", service.clone()));
        }
        params
    }
}

/// Response from the aggregated statistics endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatedStatsResponse {
    #[serde(default)]
    pub timeseries: Vec<serde_json::Value>,

    #[serde(default)]
    pub top_services: Vec<serde_json::Value>,

    #[serde(default)]
    pub top_errors: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection reset")
        }
    }

    impl std::error::Error for Inner {}

    #[derive(Debug)]
    struct QueryFailed(Inner);

    impl fmt::Display for QueryFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Database timeout")
        }
    }

    impl std::error::Error for QueryFailed {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_log_level_serialization() {
        let json = serde_json::to_string(&LogLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");

        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::all().len(), 5);
    }

    #[test]
    fn test_log_entry_wire_shape() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let entry = LogEntry::new("api", LogLevel::Info, "hello")
            .with_time(time)
            .with_trace_id("trace-1");

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["service"], "api");
        assert_eq!(value["level"], "info");
        assert_eq!(value["time"], "2024-01-02T03:04:05.000000Z");
        assert_eq!(value["trace_id"], "trace-1");
        assert!(value["metadata"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_log_entry_timestamp_is_utc() {
        let entry = LogEntry::new("api", LogLevel::Debug, "x");
        assert!(entry.time.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&entry.time).is_ok());
    }

    #[test]
    fn test_error_metadata_includes_source_chain() {
        let err = QueryFailed(Inner);
        let metadata = error_metadata(&err);

        let error = &metadata["error"];
        assert_eq!(error["name"], "QueryFailed");
        assert_eq!(error["message"], "Database timeout");
        assert_eq!(error["stack"], "connection reset");
    }

    #[test]
    fn test_error_metadata_for_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let metadata = error_metadata(&err);
        assert_eq!(metadata["error"]["name"], "Error");
        assert_eq!(metadata["error"]["message"], "disk full");
        assert_eq!(metadata["error"]["stack"], "");
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
    }

    #[test]
    fn test_query_options_params() {
        let options = QueryOptions {
            service: Some("api-gateway".to_string()),
            level: Some(LogLevel::Error),
            q: Some("timeout".to_string()),
            limit: 50,
            ..QueryOptions::default()
        };

        let params = options.to_params();
        assert!(params.contains(&("limit", "50".to_string())));
        assert!(params.contains(&("offset", "0".to_string())));
        assert!(params.contains(&("service", "api-gateway".to_string())));
        assert!(params.contains(&("level", "error".to_string())));
        assert!(params.contains(&("q", "timeout".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "from"));
    }

    #[test]
    fn test_stats_options_defaults() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let options = AggregatedStatsOptions::new(from, to);

        let params = options.to_params();
        assert_eq!(params.len(), 3);
        assert!(params.contains(&("interval", "1h".to_string())));
    }

    #[test]
    fn test_logs_response_partial_deserialization() {
        let response: LogsResponse = serde_json::from_str(r#"{"total": 3}"#).unwrap();
        assert_eq!(response.total, 3);
        assert!(response.logs.is_empty());
    }
}
