// src/upload/batch.rs
//! Upload a set of recordings over one authenticated connection

use crate::observability::UPLOADS_FAILED;
use crate::recording::log_entry::LogEvent;
use crate::recording::types::{Recording, UploadStatus};
use crate::upload::coordinator::UploadCoordinator;
use crate::utils::errors::{Result, UplinkError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Final state of every recording handed to [`upload_recordings`]
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Recordings in the order they were passed in, including skipped ones
    pub recordings: Vec<Recording>,
    /// Recordings that were attempted and ended with `uploadStatus=failed`
    pub failed_count: usize,
    /// Recordings that were not uploadable and left untouched
    pub skipped_count: usize,
}

impl BatchReport {
    pub fn uploaded(&self) -> impl Iterator<Item = &Recording> {
        self.recordings
            .iter()
            .filter(|r| r.upload_status == UploadStatus::Uploaded)
    }
}

/// Upload every uploadable recording concurrently.
///
/// Authentication is awaited once for the batch; a rejected access token
/// aborts the whole batch with [`UplinkError::AuthenticationRequired`].
/// Individual failures are recorded on each recording and counted in the
/// report. A recording whose task panics is marked failed with an
/// [`UplinkError::InvariantViolation`]; the rest of the batch is unaffected.
/// Cancelling `shutdown` cancels every in-flight recording.
pub async fn upload_recordings(
    coordinator: Arc<UploadCoordinator>,
    recordings: Vec<Recording>,
    remove_after_upload: bool,
    shutdown: CancellationToken,
) -> Result<BatchReport> {
    let (uploadable, skipped): (Vec<Recording>, Vec<Recording>) =
        recordings.into_iter().partition(Recording::can_upload);

    let mut report = BatchReport {
        skipped_count: skipped.len(),
        ..BatchReport::default()
    };

    if uploadable.is_empty() {
        info!("No recordings to upload");
        report.recordings = skipped;
        return Ok(report);
    }

    if let Err(e) = coordinator.api().client().wait_until_authenticated().await {
        return Err(match e {
            UplinkError::Protocol(p) if p.is_authentication_required() => {
                UplinkError::AuthenticationRequired(p.message)
            }
            other => other,
        });
    }

    info!("Uploading {} recordings", uploadable.len());

    let handles: Vec<(Recording, JoinHandle<Recording>)> = uploadable
        .into_iter()
        .map(|recording| {
            let coordinator = Arc::clone(&coordinator);
            let cancel = shutdown.child_token();
            let mut owned = recording.clone();

            let handle = tokio::spawn(async move {
                // The failure is already stored on the recording.
                let _ = coordinator.upload_recording(&mut owned, cancel).await;
                info!(
                    recording_id = %owned.id,
                    "Recording {} is {}",
                    owned.id,
                    owned.upload_status.as_str()
                );
                owned
            });

            (recording, handle)
        })
        .collect();

    let mut finished = Vec::with_capacity(handles.len());
    for (mut recording, handle) in handles {
        match handle.await {
            Ok(done) => finished.push(done),
            Err(e) => {
                let error = UplinkError::InvariantViolation(format!(
                    "Upload task for {} did not complete: {}",
                    recording.id, e
                ));
                error!(recording_id = %recording.id, "{}", error);
                metrics::counter!(UPLOADS_FAILED).increment(1);

                let failed = LogEvent::UploadFailed {
                    error: Some(error.to_string()),
                };
                if let Err(log_err) = coordinator.log().append_entry(&recording.id, failed).await {
                    warn!("Could not record upload failure for {}: {}", recording.id, log_err);
                }
                recording.record_upload_failure(error);
                finished.push(recording);
            }
        }
    }

    if remove_after_upload {
        for recording in finished
            .iter()
            .filter(|r| r.upload_status == UploadStatus::Uploaded)
        {
            if let Err(e) = coordinator.log().remove_from_disk(&recording.id).await {
                warn!("Failed to remove {} after upload: {}", recording.id, e);
            }
        }
    }

    report.failed_count = finished
        .iter()
        .filter(|r| r.upload_status == UploadStatus::Failed)
        .count();
    report.recordings = finished;
    report.recordings.extend(skipped);

    if report.failed_count > 0 {
        warn!("{} recordings failed to upload", report.failed_count);
    }
    Ok(report)
}
