// src/upload/coordinator.rs
//! Per-recording upload state machine
//!
//! ```text
//! crashed ──► report blobs + metadata marker ──► crashUploaded
//!
//! finished ──► stat ──► ticket ──► uploadStarted ──► metadata ──► PUT (single | parts)
//!                                        │                              │
//!                                        └──── uploadFailed ◄── error ──┤
//!                                                                       ▼
//!                                        source maps (best effort) ──► uploadFinished ──► processing
//! ```
//!
//! Every durable transition is appended to the recording log before the next
//! step starts, so log lines for one recording are strictly ordered.

use crate::observability::{UPLOADS_FAILED, UPLOADS_FINISHED, UPLOADS_STARTED, UPLOAD_BYTES};
use crate::protocol::api::{MultipartTicket, UploadTicket, UplinkApi};
use crate::recording::log_entry::LogEvent;
use crate::recording::storage::RecordingLog;
use crate::recording::types::{ProcessingStatus, Recording, RecordingStatus, UploadStatus};
use crate::runtime::retry::{retry_with_exponential_backoff, RetryPolicy};
use crate::runtime::work_queue::WorkQueue;
use crate::telemetry::collaborators::FeatureFlags;
use crate::upload::http::ByteUploader;
use crate::upload::metadata::sanitize_metadata;
use crate::upload::multipart::MultipartUploader;
use crate::upload::source_maps::upload_source_maps;
use crate::utils::config::{ProcessingMode, UplinkConfig};
use crate::utils::errors::{Result, UplinkError};
use futures::future::try_join_all;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings the coordinator needs from [`UplinkConfig`]
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub multipart_min_size: u64,
    pub multipart_flag: String,
    pub preferred_chunk_size: u64,
    pub processing: ProcessingMode,
    pub exponential: RetryPolicy,
    pub linear: RetryPolicy,
    pub part_concurrency: usize,
    pub source_map_concurrency: usize,
}

impl UploadOptions {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            multipart_min_size: config.upload.multipart_min_size,
            multipart_flag: config.upload.multipart_flag.clone(),
            preferred_chunk_size: config.upload.preferred_chunk_size,
            processing: config.upload.processing,
            exponential: config.retry.exponential_policy(),
            linear: config.retry.linear_policy(),
            part_concurrency: config.upload.part_concurrency,
            source_map_concurrency: config.upload.source_map_concurrency,
        }
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&UplinkConfig::default())
    }
}

enum Ticket {
    Single(UploadTicket),
    Multipart(MultipartTicket),
}

/// Drives uploads for a batch of recordings over one connection
pub struct UploadCoordinator {
    api: UplinkApi,
    log: Arc<RecordingLog>,
    uploader: Arc<dyn ByteUploader>,
    flags: Arc<dyn FeatureFlags>,
    multipart: MultipartUploader,
    source_map_queue: WorkQueue,
    options: UploadOptions,
}

impl UploadCoordinator {
    pub fn new(
        api: UplinkApi,
        log: Arc<RecordingLog>,
        uploader: Arc<dyn ByteUploader>,
        flags: Arc<dyn FeatureFlags>,
        options: UploadOptions,
    ) -> Self {
        let multipart = MultipartUploader::new(
            Arc::clone(&uploader),
            WorkQueue::new("multipart parts", options.part_concurrency),
            options.linear.clone(),
        );

        Self {
            api,
            log,
            uploader,
            flags,
            multipart,
            source_map_queue: WorkQueue::new("source maps", options.source_map_concurrency),
            options,
        }
    }

    pub fn api(&self) -> &UplinkApi {
        &self.api
    }

    pub fn log(&self) -> &RecordingLog {
        &self.log
    }

    /// Upload one recording, updating both the entity and the log.
    ///
    /// The error is also stored on `recording.upload_error`.
    pub async fn upload_recording(
        &self,
        recording: &mut Recording,
        cancel: CancellationToken,
    ) -> Result<()> {
        if !recording.can_upload() {
            return Err(UplinkError::InvariantViolation(format!(
                "Recording {} is not uploadable ({}, upload {})",
                recording.id,
                recording.recording_status.as_str(),
                recording.upload_status.as_str()
            )));
        }

        metrics::counter!(UPLOADS_STARTED).increment(1);
        info!(recording_id = %recording.id, "Starting upload");

        let outcome = if recording.recording_status == RecordingStatus::Crashed {
            self.upload_crash(recording).await
        } else {
            self.upload_finished(recording, &cancel).await
        };

        match outcome {
            Ok(()) => {
                metrics::counter!(UPLOADS_FINISHED).increment(1);
                recording.upload_status = UploadStatus::Uploaded;
                recording.upload_error = None;
                info!(recording_id = %recording.id, "Upload finished");

                if recording.recording_status != RecordingStatus::Crashed {
                    self.process(recording).await;
                }
                Ok(())
            }
            Err(e) => {
                metrics::counter!(UPLOADS_FAILED).increment(1);
                error!(recording_id = %recording.id, "Upload failed: {}", e);
                recording.record_upload_failure(e.clone());
                Err(e)
            }
        }
    }

    async fn upload_crash(&self, recording: &Recording) -> Result<()> {
        let marker = json!({
            "kind": "recordingMetadata",
            "recordingId": recording.id,
            "buildId": recording.build_id,
            "metadata": sanitize_metadata(&recording.metadata.raw),
        });

        let policy = &self.options.exponential;
        let reports = recording
            .crash_data
            .iter()
            .chain(std::iter::once(&marker))
            .map(|blob| {
                retry_with_exponential_backoff(policy, "report crash", move || {
                    self.api.report_crash(blob)
                })
            });
        try_join_all(reports).await?;

        self.log
            .append_entry(&recording.id, LogEvent::CrashUploaded)
            .await?;
        info!(
            recording_id = %recording.id,
            "Crash report uploaded with {} blobs",
            recording.crash_data.len()
        );
        Ok(())
    }

    async fn upload_finished(
        &self,
        recording: &mut Recording,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = recording.path.clone().ok_or_else(|| {
            UplinkError::InvariantViolation(format!("Recording {} has no path", recording.id))
        })?;
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| UplinkError::io(&path, e))?
            .len();

        let multipart = self.flags.is_enabled(&self.options.multipart_flag, true)
            && size > self.options.multipart_min_size;
        debug!(recording_id = %recording.id, size, multipart, "Requesting upload ticket");

        let ticket = if multipart {
            Ticket::Multipart(
                self.api
                    .begin_recording_multipart_upload(
                        &recording.id,
                        &recording.build_id,
                        size,
                        self.options.preferred_chunk_size,
                    )
                    .await?,
            )
        } else {
            Ticket::Single(
                self.api
                    .begin_recording_upload(&recording.id, &recording.build_id, size)
                    .await?,
            )
        };

        self.log
            .append_entry(&recording.id, LogEvent::UploadStarted { multipart })
            .await?;
        recording.upload_status = UploadStatus::Uploading;

        if let Err(e) = self.transfer(recording, &path, size, ticket, cancel).await {
            let failed = LogEvent::UploadFailed {
                error: Some(e.to_string()),
            };
            if let Err(log_err) = self.log.append_entry(&recording.id, failed).await {
                warn!("Could not record upload failure for {}: {}", recording.id, log_err);
            }
            return Err(e);
        }

        let summary = upload_source_maps(&self.api, &self.source_map_queue, recording).await;
        if summary.failed > 0 {
            warn!(
                recording_id = %recording.id,
                "{} of {} source maps failed to upload",
                summary.failed,
                summary.failed + summary.uploaded
            );
        }

        if let Err(e) = self
            .log
            .append_entry(&recording.id, LogEvent::UploadFinished)
            .await
        {
            // Leave the log at failed rather than stuck at uploading.
            let failed = LogEvent::UploadFailed {
                error: Some(e.to_string()),
            };
            if let Err(log_err) = self.log.append_entry(&recording.id, failed).await {
                warn!("Could not record upload failure for {}: {}", recording.id, log_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn transfer(
        &self,
        recording: &Recording,
        path: &Path,
        size: u64,
        ticket: Ticket,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let metadata = sanitize_metadata(&recording.metadata.raw);
        retry_with_exponential_backoff(&self.options.exponential, "set recording metadata", || {
            self.api.set_recording_metadata(&recording.id, &metadata)
        })
        .await?;

        match ticket {
            Ticket::Single(ticket) => {
                let put = retry_with_exponential_backoff(
                    &self.options.exponential,
                    "recording upload",
                    || self.put_file(path, &ticket.upload_link),
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UplinkError::Cancelled),
                    result = put => result?,
                }
                self.api.end_recording_upload(&recording.id).await?;
            }
            Ticket::Multipart(ticket) => {
                let etags = self.multipart.upload(path, size, &ticket, cancel).await?;
                self.api
                    .end_recording_multipart_upload(&recording.id, &ticket.upload_id, &etags)
                    .await?;
            }
        }

        metrics::histogram!(UPLOAD_BYTES).record(size as f64);
        Ok(())
    }

    async fn put_file(&self, path: &Path, url: &str) -> Result<()> {
        self.uploader.put_file(url, path).await?;
        Ok(())
    }

    async fn process(&self, recording: &mut Recording) {
        match self.options.processing {
            ProcessingMode::None => {}
            ProcessingMode::Start => {
                let api = self.api.clone();
                let id = recording.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = api.process_recording(&id).await {
                        warn!(recording_id = %id, "Failed to start processing: {}", e);
                    }
                });
            }
            ProcessingMode::Wait => {
                if let Err(e) = self.process_and_wait(recording).await {
                    warn!(recording_id = %recording.id, "Processing bookkeeping failed: {}", e);
                }
            }
        }
    }

    async fn process_and_wait(&self, recording: &mut Recording) -> Result<()> {
        self.log
            .append_entry(&recording.id, LogEvent::ProcessingStarted)
            .await?;
        recording.processing_status = ProcessingStatus::Processing;

        let id = recording.id.clone();
        let outcome = retry_with_exponential_backoff(&self.options.exponential, "process recording", || {
            self.api.process_recording(&id)
        })
        .await;

        match outcome {
            Ok(()) => {
                self.log
                    .append_entry(&id, LogEvent::ProcessingFinished)
                    .await?;
                recording.processing_status = ProcessingStatus::Processed;
                info!(recording_id = %id, "Recording processed");
            }
            Err(e) => {
                self.log
                    .append_entry(
                        &id,
                        LogEvent::ProcessingFailed {
                            error: Some(e.to_string()),
                        },
                    )
                    .await?;
                recording.processing_status = ProcessingStatus::Failed;
                warn!(recording_id = %id, "Processing failed: {}", e);
            }
        }
        Ok(())
    }
}
