//! Configuration for the LogTide client.
//!
//! Options are built in code with [`ClientOptions::new`] and the `with_*`
//! setters, or loaded from `LOGTIDE_*` environment variables.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::models::Metadata;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
const DEFAULT_CIRCUIT_BREAKER_RESET_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for a [`LogTideClient`](crate::LogTideClient).
///
/// Immutable once the client is constructed.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the LogTide API, without trailing slash
    pub api_url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Number of buffered entries that triggers an immediate flush
    pub batch_size: usize,

    /// Period of the background flush; zero disables it
    pub flush_interval: Duration,

    /// Maximum number of entries held in memory
    pub max_buffer_size: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Base delay for exponential backoff
    pub retry_delay: Duration,

    /// Consecutive failures that open the circuit breaker
    pub circuit_breaker_threshold: u32,

    /// Time the breaker stays open before allowing a probe
    pub circuit_breaker_reset_timeout: Duration,

    /// Upper bound for a single HTTP request
    pub request_timeout: Duration,

    /// Merged into every entry; entry metadata wins on key collisions
    pub global_metadata: Metadata,

    /// Generate a fresh trace id for every entry that lacks one
    pub auto_trace_id: bool,
}

/// Error type for configuration loading failures
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: None,
        }
    }

    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ClientOptions {
    /// Create options for the given endpoint with default tuning.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: normalize_url(&api_url.into()),
            api_key: api_key.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_reset_timeout: Duration::from_millis(DEFAULT_CIRCUIT_BREAKER_RESET_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            global_metadata: Metadata::new(),
            auto_trace_id: false,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `LOGTIDE_API_URL` and `LOGTIDE_API_KEY` are required.
    /// - `LOGTIDE_BATCH_SIZE`, `LOGTIDE_FLUSH_INTERVAL_MS`, `LOGTIDE_MAX_BUFFER_SIZE`,
    ///   `LOGTIDE_MAX_RETRIES`, `LOGTIDE_RETRY_DELAY_MS`,
    ///   `LOGTIDE_CIRCUIT_BREAKER_THRESHOLD`, `LOGTIDE_CIRCUIT_BREAKER_RESET_MS`,
    ///   `LOGTIDE_REQUEST_TIMEOUT_SECS` and `LOGTIDE_AUTO_TRACE_ID` are optional.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending variable when a required
    /// variable is missing, a value does not parse, or validation fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use logtide_client::ClientOptions;
    ///
    /// let options = ClientOptions::from_env().expect("Failed to load config");
    /// println!("API URL: {}", options.api_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup using the `LOGTIDE_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::for_var(key, "variable is not set"))
        };

        let mut options = Self::new(required("LOGTIDE_API_URL")?, required("LOGTIDE_API_KEY")?);

        if let Some(v) = parse_var::<usize>(&lookup, "LOGTIDE_BATCH_SIZE")? {
            options.batch_size = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LOGTIDE_FLUSH_INTERVAL_MS")? {
            options.flush_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "LOGTIDE_MAX_BUFFER_SIZE")? {
            options.max_buffer_size = v;
        }
        if let Some(v) = parse_var::<u32>(&lookup, "LOGTIDE_MAX_RETRIES")? {
            options.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LOGTIDE_RETRY_DELAY_MS")? {
            options.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "LOGTIDE_CIRCUIT_BREAKER_THRESHOLD")? {
            options.circuit_breaker_threshold = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LOGTIDE_CIRCUIT_BREAKER_RESET_MS")? {
            options.circuit_breaker_reset_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LOGTIDE_REQUEST_TIMEOUT_SECS")? {
            options.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<bool>(&lookup, "LOGTIDE_AUTO_TRACE_ID")? {
            options.auto_trace_id = v;
        }

        options.validate()?;
        Ok(options)
    }

    /// Check the options for values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.is_empty() {
            return Err(ConfigError::new("api_url must not be empty"));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::new("api_key must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::new("batch size must be greater than 0"));
        }
        if self.max_buffer_size < self.batch_size {
            return Err(ConfigError::new(format!(
                "max buffer size {} is smaller than batch size {}",
                self.max_buffer_size, self.batch_size
            )));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::new(
                "circuit breaker threshold must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, reset_timeout: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_reset_timeout = reset_timeout;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_global_metadata(mut self, global_metadata: Metadata) -> Self {
        self.global_metadata = global_metadata;
        self
    }

    pub fn with_auto_trace_id(mut self, auto_trace_id: bool) -> Self {
        self.auto_trace_id = auto_trace_id;
        self
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::for_var(key, format!("'{}' is not a valid value", value))),
        None => Ok(None),
    }
}
