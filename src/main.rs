//! # Flight Tracker
//!
//! Track RC plane flights from LoRa ground-station telemetry.
//!
//! Reads telemetry lines from the USB serial receiver, detects takeoff and
//! landing, and records each flight to SQLite until Ctrl+C.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use flight_tracker::config::{Config, LoggingConfig};
use flight_tracker::ingest::Ingestor;
use flight_tracker::live::{LiveEvent, LiveView};
use flight_tracker::serial::SerialConnector;
use flight_tracker::store::SessionStore;

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "flight-tracker.log";

/// Main entry point for Flight Tracker
///
/// # Control Flow
///
/// 1. Load configuration (first argument, or `config/default.toml`)
/// 2. Set up logging with tracing subscriber
/// 3. Open the session database
/// 4. Ingest telemetry until Ctrl+C, reconnecting to the receiver as needed
///
/// # Errors
///
/// Returns error if the configuration is invalid, the database cannot be
/// opened, or a telemetry point cannot be persisted.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))?
    } else {
        Config::default()
    };

    let _log_guard = init_logging(&config.logging)?;

    info!("Flight Tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    if !config_found {
        warn!("No configuration at {}, using defaults", config_path);
    }

    let store = SessionStore::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open flight database {}", config.storage.db_path))?;

    let ingestor = Ingestor::new(&config, store);
    tokio::spawn(log_flight_events(ingestor.view()));

    let mut connector = SerialConnector::new(&config.serial);

    info!("Press Ctrl+C to exit");

    let stats = ingestor
        .run(&mut connector, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await?;

    info!("Shutdown complete. Decoded {} telemetry samples", stats.samples);

    Ok(())
}

/// Initialize tracing, optionally teeing to a daily rolling file
///
/// `RUST_LOG` directives are honoured; the configured level is the default.
/// The returned guard must stay alive for file output to be flushed.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level {}", config.level))?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if config.dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(Some(guard))
}

/// Log flight transitions as they are broadcast
async fn log_flight_events(view: LiveView) {
    let mut events = view.subscribe();

    loop {
        match events.recv().await {
            Ok(event @ (LiveEvent::FlightStarted { .. } | LiveEvent::FlightEnded { .. })) => {
                match event.to_json() {
                    Ok(json) => info!("Flight event: {}", json),
                    Err(e) => warn!("Failed to serialize flight event: {}", e),
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Event logger lagged, skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
