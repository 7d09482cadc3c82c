use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::client::Resolution;
use crate::state::request_id::RequestId;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(log_level: &str) {
    let Some(level) = tracing_level(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn tracing_level(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log how a request resolved, computing duration from its start time.
pub fn log_request_resolved(request_id: RequestId, resolution: &Resolution, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis();
    match resolution {
        Resolution::Streamed(message_id) | Resolution::Fallback(message_id) => tracing::info!(
            request_id = %request_id,
            message_id = %message_id,
            via = resolution.label(),
            elapsed_ms,
            "request resolved"
        ),
        Resolution::Failed(message_id) => tracing::warn!(
            request_id = %request_id,
            message_id = %message_id,
            elapsed_ms,
            "request resolved with an error"
        ),
        Resolution::Cancelled => tracing::info!(
            request_id = %request_id,
            elapsed_ms,
            "request cancelled"
        ),
    }
}
