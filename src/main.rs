// src/main.rs
//! Recording Uplink
//!
//! Uploads every finished or crashed recording in the local recordings
//! directory and prints the resulting status table.

use anyhow::{Context, Result};
use recording_uplink::observability::{init_metrics, init_tracing};
use recording_uplink::recording::{ExportFormat, RecordingExporter};
use recording_uplink::telemetry::{
    FixedIdentity, Identity, PackageInfo, StaticFeatureFlags, TelemetryClient, TracingSink,
};
use recording_uplink::upload::{upload_recordings, HyperUploader, UploadCoordinator, UploadOptions};
use recording_uplink::{ProtocolClient, RecordingLog, UplinkApi, UplinkConfig, USER_AGENT};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    init_metrics()?;

    info!("Starting {}", USER_AGENT);

    let config = UplinkConfig::load().context("Failed to load configuration")?;
    info!("Recordings directory: {}", config.recordings_dir.display());

    let log = Arc::new(RecordingLog::from_config(&config));
    let recordings = log.get_recordings(None).await?;
    if recordings.is_empty() {
        info!("No recordings found");
        return Ok(());
    }

    let telemetry = TelemetryClient::new(Arc::new(TracingSink));
    telemetry.start(
        Arc::new(FixedIdentity(Identity {
            id: "anonymous".to_string(),
            kind: "user".to_string(),
        })),
        PackageInfo::current(),
    );

    let client = ProtocolClient::connect(&config.server.address, config.server.access_token.clone())
        .await
        .context("Failed to connect to the recording service")?;

    let coordinator = Arc::new(UploadCoordinator::new(
        UplinkApi::new(client.clone()),
        Arc::clone(&log),
        Arc::new(HyperUploader::http(USER_AGENT)),
        Arc::new(StaticFeatureFlags::new()),
        UploadOptions::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling uploads...");
            on_signal.cancel();
        }
    });

    let result = upload_recordings(
        coordinator,
        recordings,
        config.upload.remove_after_upload,
        shutdown,
    )
    .await;
    client.close();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            telemetry.flush_and_close().await;
            return Err(e.into());
        }
    };

    let table = RecordingExporter::new(ExportFormat::Table).export(&report.recordings)?;
    print!("{}", table);

    telemetry.track(
        "upload.batch",
        json!({
            "uploaded": report.uploaded().count(),
            "failed": report.failed_count,
            "skipped": report.skipped_count,
        }),
    );
    telemetry.flush_and_close().await;

    if report.failed_count > 0 {
        println!("{} recording(s) failed to upload", report.failed_count);
        std::process::exit(1);
    }
    Ok(())
}
