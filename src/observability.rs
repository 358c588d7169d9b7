// src/observability.rs
//! Tracing and metrics setup
//!
//! Logs go through `tracing`; `RUST_LOG` controls the filter and
//! `UPLINK_LOG_FORMAT=json` switches to JSON lines. Counters are recorded with
//! the `metrics` facade into an in-process Prometheus recorder.

use crate::utils::errors::{Result, UplinkError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, EnvFilter};

pub const UPLOADS_STARTED: &str = "uplink_uploads_started_total";
pub const UPLOADS_FINISHED: &str = "uplink_uploads_finished_total";
pub const UPLOADS_FAILED: &str = "uplink_uploads_failed_total";
pub const PARTS_UPLOADED: &str = "uplink_parts_uploaded_total";
pub const LOG_LINES_DROPPED: &str = "uplink_log_lines_dropped_total";
pub const TELEMETRY_DROPPED: &str = "uplink_telemetry_dropped_total";
pub const UPLOAD_BYTES: &str = "uplink_upload_bytes";

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("UPLINK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };

    result.map_err(|e| UplinkError::Config(format!("Failed to initialize tracing: {}", e)))
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| UplinkError::Config(format!("Failed to install metrics recorder: {}", e)))
}
