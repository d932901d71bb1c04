//! # Structured Logging Module
//!
//! Environment-aware structured logging. Everything goes to stderr: a worker's
//! stdout carries the IPC channel and must stay clean.
//!
//! The level comes from `DOCSHIFT_ENV` (`production` logs at info, everything
//! else at debug), can be raised with `-v`, and is overridden entirely by
//! `RUST_LOG`. Setting `DOCSHIFT_LOG_FORMAT=json` switches to JSON lines.

use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::types::{ChunkIndex, WorkerId};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging at the environment's default level
pub fn init_structured_logging() {
    init_with_verbosity(0);
}

/// Initialize structured logging; each `verbose` step raises the level once
pub fn init_with_verbosity(verbose: u8) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = match verbose {
            0 => get_log_level(&environment).to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        let json = use_json_format();

        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level))
        };

        let subscriber = tracing_subscriber::registry()
            .with(json.then(|| {
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(filter())
            }))
            .with((!json).then(|| {
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false)
                    .with_filter(filter())
            }));

        // Tests and embedding hosts may already have installed a subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::debug!(
            pid = process::id(),
            environment = %environment,
            json = json,
            "Structured logging initialized"
        );
    });
}

/// Current environment from `DOCSHIFT_ENV` (or `APP_ENV`)
pub fn get_environment() -> String {
    std::env::var("DOCSHIFT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("DOCSHIFT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for chunk lifecycle events
pub fn log_chunk_operation(
    operation: &str,
    chunk: ChunkIndex,
    worker_id: Option<WorkerId>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        chunk = chunk,
        worker_id = worker_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 CHUNK_OPERATION"
    );
}

/// Log structured data for worker lifecycle events
pub fn log_worker_operation(
    operation: &str,
    worker_id: WorkerId,
    pid: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        worker_id = worker_id,
        pid = pid,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👷 WORKER_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
