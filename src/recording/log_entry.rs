// src/recording/log_entry.rs
//! Append-only log records
//!
//! Every line of `recordings.log` is one `LogEntry`: the common
//! `{id, kind, timestamp}` header plus kind-specific fields.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One line of the recording log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Recording id, or the source-map id for `sourcemapAdded` entries
    pub id: String,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    #[serde(flatten)]
    pub event: LogEvent,
}

/// Kind-specific payload, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LogEvent {
    CreateRecording {
        build_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        driver_version: Option<String>,
    },
    AddMetadata {
        metadata: Map<String, Value>,
    },
    WriteStarted {
        path: PathBuf,
    },
    WriteFinished,
    Crashed,
    CrashData {
        data: Vec<Value>,
    },
    CrashUploaded,
    SourcemapAdded {
        recording_id: String,
        path: PathBuf,
        #[serde(rename = "baseURL")]
        base_url: String,
        #[serde(default)]
        target_content_hash: Option<String>,
        #[serde(default, rename = "targetURLHash")]
        target_url_hash: Option<String>,
        #[serde(default, rename = "targetMapURLHash")]
        target_map_url_hash: Option<String>,
    },
    OriginalSourceAdded {
        recording_id: String,
        parent_id: String,
        path: PathBuf,
        parent_offset: u64,
    },
    UploadStarted {
        #[serde(default)]
        multipart: bool,
    },
    UploadFinished,
    UploadFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RecordingUnusable {
        reason: String,
    },
    ProcessingStarted,
    ProcessingFinished,
    ProcessingFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Discriminant of a [`LogEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    CreateRecording,
    AddMetadata,
    WriteStarted,
    SourcemapAdded,
    OriginalSourceAdded,
    WriteFinished,
    UploadStarted,
    UploadFinished,
    UploadFailed,
    RecordingUnusable,
    Crashed,
    CrashData,
    CrashUploaded,
    ProcessingStarted,
    ProcessingFinished,
    ProcessingFailed,
}

/// Fold order. Entries for one recording are applied in this order no matter
/// how lines were interleaved on disk.
pub const KIND_PRIORITY: [LogKind; 16] = [
    LogKind::CreateRecording,
    LogKind::AddMetadata,
    LogKind::WriteStarted,
    LogKind::SourcemapAdded,
    LogKind::OriginalSourceAdded,
    LogKind::WriteFinished,
    LogKind::UploadStarted,
    LogKind::UploadFinished,
    LogKind::UploadFailed,
    LogKind::RecordingUnusable,
    LogKind::Crashed,
    LogKind::CrashData,
    LogKind::CrashUploaded,
    LogKind::ProcessingStarted,
    LogKind::ProcessingFinished,
    LogKind::ProcessingFailed,
];

impl LogKind {
    /// Position in [`KIND_PRIORITY`]
    pub fn priority(self) -> usize {
        KIND_PRIORITY
            .iter()
            .position(|k| *k == self)
            .unwrap_or(KIND_PRIORITY.len())
    }
}

impl LogEvent {
    pub fn kind(&self) -> LogKind {
        match self {
            LogEvent::CreateRecording { .. } => LogKind::CreateRecording,
            LogEvent::AddMetadata { .. } => LogKind::AddMetadata,
            LogEvent::WriteStarted { .. } => LogKind::WriteStarted,
            LogEvent::WriteFinished => LogKind::WriteFinished,
            LogEvent::Crashed => LogKind::Crashed,
            LogEvent::CrashData { .. } => LogKind::CrashData,
            LogEvent::CrashUploaded => LogKind::CrashUploaded,
            LogEvent::SourcemapAdded { .. } => LogKind::SourcemapAdded,
            LogEvent::OriginalSourceAdded { .. } => LogKind::OriginalSourceAdded,
            LogEvent::UploadStarted { .. } => LogKind::UploadStarted,
            LogEvent::UploadFinished => LogKind::UploadFinished,
            LogEvent::UploadFailed { .. } => LogKind::UploadFailed,
            LogEvent::RecordingUnusable { .. } => LogKind::RecordingUnusable,
            LogEvent::ProcessingStarted => LogKind::ProcessingStarted,
            LogEvent::ProcessingFinished => LogKind::ProcessingFinished,
            LogEvent::ProcessingFailed { .. } => LogKind::ProcessingFailed,
        }
    }
}

impl LogEntry {
    /// Stamp `event` for `id` with the current time
    pub fn now(id: impl Into<String>, event: LogEvent) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now().timestamp_millis(),
            event,
        }
    }

    pub fn kind(&self) -> LogKind {
        self.event.kind()
    }

    /// The recording this entry belongs to
    pub fn recording_id(&self) -> &str {
        match &self.event {
            LogEvent::SourcemapAdded { recording_id, .. }
            | LogEvent::OriginalSourceAdded { recording_id, .. } => recording_id,
            _ => &self.id,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }
}
