// src/recording/types.rs
//! Recording entity and its three independent state machines

use crate::utils::errors::UplinkError;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Capture lifecycle. `Finished`, `Crashed` and `Unusable` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Finished,
    Crashed,
    Unusable,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordingStatus::Recording)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Recording => "recording",
            RecordingStatus::Finished => "finished",
            RecordingStatus::Crashed => "crashed",
            RecordingStatus::Unusable => "unusable",
        }
    }
}

/// Upload lifecycle. `Failed` may move back to `Uploading`; `Uploaded` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Unset,
    Uploading,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Unset => "-",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }
}

/// Server-side processing lifecycle, independent of the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Unset,
    Processing,
    Processed,
    Failed,
}

/// A source file a source map was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalSourceEntry {
    pub path: PathBuf,
    /// Byte offset of this source inside the parent source map
    pub parent_offset: u64,
}

/// A source map captured alongside a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    pub id: String,
    pub path: PathBuf,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub target_content_hash: Option<String>,
    #[serde(rename = "targetURLHash")]
    pub target_url_hash: Option<String>,
    #[serde(rename = "targetMapURLHash")]
    pub target_map_url_hash: Option<String>,
    pub original_sources: Vec<OriginalSourceEntry>,
}

/// Metadata merged from `addMetadata` log entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub host: Option<String>,
    pub title: Option<String>,
    pub process_group_id: Option<String>,
    pub process_type: Option<String>,
    pub source_maps: Vec<SourceMapEntry>,
    /// Every key ever added, as written by the recorder
    pub raw: Map<String, Value>,
}

impl RecordingMetadata {
    /// Merge one `addMetadata` payload; later keys overwrite earlier ones
    pub fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.raw.insert(key.clone(), value.clone());
        }

        let text = |key: &str| self.raw.get(key).and_then(value_as_string);

        self.host = text("host").or_else(|| text("uri"));
        self.title = text("title");
        self.process_group_id = text("processGroupId");
        self.process_type = text("processType");
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One captured trace, rebuilt from the recording log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub build_id: String,
    pub create_time: DateTime<Utc>,
    pub path: Option<PathBuf>,
    pub recording_status: RecordingStatus,
    pub upload_status: UploadStatus,
    pub processing_status: ProcessingStatus,
    pub metadata: RecordingMetadata,
    pub crash_data: Vec<Value>,
    pub unusable_reason: Option<String>,
    /// Last upload failure observed in this process
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub upload_error: Option<UplinkError>,
}

fn serialize_error<S: Serializer>(
    error: &Option<UplinkError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Recording {
    pub fn new(id: impl Into<String>, build_id: impl Into<String>, create_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            build_id: build_id.into(),
            create_time,
            path: None,
            recording_status: RecordingStatus::Recording,
            upload_status: UploadStatus::Unset,
            processing_status: ProcessingStatus::Unset,
            metadata: RecordingMetadata::default(),
            crash_data: Vec::new(),
            unusable_reason: None,
            upload_error: None,
        }
    }

    /// True iff the file exists locally, no upload was attempted, and capture ended
    pub fn can_upload(&self) -> bool {
        self.path.is_some()
            && self.upload_status == UploadStatus::Unset
            && matches!(
                self.recording_status,
                RecordingStatus::Finished | RecordingStatus::Crashed
            )
    }

    /// Every source-map and original-source file this recording references
    pub fn source_file_paths(&self) -> Vec<PathBuf> {
        self.metadata
            .source_maps
            .iter()
            .flat_map(|map| {
                std::iter::once(map.path.clone())
                    .chain(map.original_sources.iter().map(|src| src.path.clone()))
            })
            .collect()
    }

    /// Mark the upload failed and keep the error for reporting
    pub fn record_upload_failure(&mut self, error: UplinkError) {
        self.upload_status = UploadStatus::Failed;
        self.upload_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finished_recording() -> Recording {
        let mut r = Recording::new("r1", "build", Utc::now());
        r.path = Some(PathBuf::from("/tmp/r1.dat"));
        r.recording_status = RecordingStatus::Finished;
        r
    }

    #[test]
    fn can_upload_requires_path_and_terminal_capture() {
        assert!(finished_recording().can_upload());

        let mut no_path = finished_recording();
        no_path.path = None;
        assert!(!no_path.can_upload());

        let mut still_recording = finished_recording();
        still_recording.recording_status = RecordingStatus::Recording;
        assert!(!still_recording.can_upload());

        let mut unusable = finished_recording();
        unusable.recording_status = RecordingStatus::Unusable;
        assert!(!unusable.can_upload());

        let mut crashed = finished_recording();
        crashed.recording_status = RecordingStatus::Crashed;
        assert!(crashed.can_upload());
    }

    #[test]
    fn can_upload_rejects_any_upload_attempt() {
        for status in [UploadStatus::Uploading, UploadStatus::Uploaded, UploadStatus::Failed] {
            let mut r = finished_recording();
            r.upload_status = status;
            assert!(!r.can_upload(), "{:?} should not be uploadable", status);
        }
    }

    #[test]
    fn metadata_merge_prefers_host_over_uri() {
        let mut meta = RecordingMetadata::default();
        meta.merge(json!({"uri": "https://a.test/x", "processGroupId": 12}).as_object().unwrap());
        assert_eq!(meta.host.as_deref(), Some("https://a.test/x"));
        assert_eq!(meta.process_group_id.as_deref(), Some("12"));

        meta.merge(json!({"host": "b.test", "title": "Page"}).as_object().unwrap());
        assert_eq!(meta.host.as_deref(), Some("b.test"));
        assert_eq!(meta.title.as_deref(), Some("Page"));
        assert_eq!(meta.raw.len(), 4);
    }

    #[test]
    fn upload_error_serializes_as_text() {
        let mut r = finished_recording();
        r.record_upload_failure(UplinkError::Cancelled);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["uploadError"], "Operation cancelled");
        assert_eq!(json["uploadStatus"], "failed");
    }
}
