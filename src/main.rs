//! LogTide demo - emits sample application logs through the client
//!
//! Simulates a small API service: requests are logged under their own trace
//! id, with the occasional slow request and upstream failure. Runs until
//! Ctrl+C, then closes the client and reports the delivery metrics.
//!
//! ## Configuration
//!
//! - `LOGTIDE_API_URL`: LogTide server URL (required)
//! - `LOGTIDE_API_KEY`: API key (required)
//! - `LOGTIDE_BATCH_SIZE`, `LOGTIDE_FLUSH_INTERVAL_MS`, `LOGTIDE_MAX_RETRIES`, ...:
//!   optional client tuning
//! - `RUST_LOG`: Logging level filter (default: info)

use std::time::Duration;

use serde_json::json;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logtide_client::{ClientOptions, LogTideClient, LogTideError, Metadata};

const SERVICE_NAME: &str = "demo-api";

/// Time between simulated requests
const REQUEST_INTERVAL_MS: u64 = 200;

/// Upper bound on the final flush at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    init_tracing();

    let options = match ClientOptions::from_env() {
        Ok(options) => options.with_global_metadata(Metadata::from([
            ("env".to_string(), json!("demo")),
            ("version".to_string(), json!(env!("CARGO_PKG_VERSION"))),
        ])),
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match LogTideClient::new(options) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create LogTide client");
            std::process::exit(1);
        }
    };

    if let Err(e) = client.info(SERVICE_NAME, "Service started", None).await {
        warn!(error = %e, "Failed to enqueue startup log");
    }

    info!("Demo running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = run_requests(&client) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, stopping...");
        }
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.close())
        .await
        .is_err()
    {
        warn!("Client close timed out after {:?}", SHUTDOWN_TIMEOUT);
    }

    let metrics = client.get_metrics();
    info!(
        logs_sent = metrics.logs_sent,
        logs_dropped = metrics.logs_dropped,
        errors = metrics.errors,
        retries = metrics.retries,
        avg_latency_ms = format!("{:.1}", metrics.avg_latency_ms),
        circuit_breaker_trips = metrics.circuit_breaker_trips,
        circuit_state = %client.get_circuit_breaker_state(),
        "Demo stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Log one simulated request per tick, forever.
async fn run_requests(client: &LogTideClient) {
    let mut ticker = interval(Duration::from_millis(REQUEST_INTERVAL_MS));
    let mut request_no: u64 = 0;

    loop {
        ticker.tick().await;
        request_no += 1;

        let result = client
            .with_new_trace_id_async(handle_request(client, request_no))
            .await;
        match result {
            Ok(()) => {}
            Err(LogTideError::BufferFull) => warn!("Buffer full, request logs dropped"),
            Err(e) => {
                warn!(error = %e, "Stopping request loop");
                break;
            }
        }
    }
}

async fn handle_request(client: &LogTideClient, request_no: u64) -> Result<(), LogTideError> {
    let path = format!("/users/{}", request_no % 50);
    client
        .info(
            SERVICE_NAME,
            "Request received",
            Some(Metadata::from([
                ("method".to_string(), json!("GET")),
                ("path".to_string(), json!(path)),
            ])),
        )
        .await?;

    if request_no % 25 == 0 {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
        client
            .error_from(SERVICE_NAME, "Upstream call failed", &err)
            .await?;
    } else if request_no % 10 == 0 {
        client
            .warn(
                SERVICE_NAME,
                "Slow request",
                Some(Metadata::from([("duration_ms".to_string(), json!(1_250))])),
            )
            .await?;
    } else {
        client.debug(SERVICE_NAME, "Request completed", None).await?;
    }
    Ok(())
}
