// src/recording/fold.rs
//! Rebuild `Recording` entities from log entries
//!
//! Entries are de-duplicated, ordered by `(kind priority, timestamp, text)`
//! and applied one at a time, so the result does not depend on the physical
//! order of lines in the file.

use crate::recording::log_entry::{LogEntry, LogEvent};
use crate::recording::types::{
    OriginalSourceEntry, ProcessingStatus, Recording, RecordingStatus, SourceMapEntry,
    UploadStatus,
};
use crate::utils::errors::{Result, UplinkError};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Fold every entry into `id → Recording`
pub fn fold_entries<I>(entries: I) -> Result<HashMap<String, Recording>>
where
    I: IntoIterator<Item = LogEntry>,
{
    let mut seen = HashSet::new();
    let mut keyed: Vec<(usize, i64, String, LogEntry)> = Vec::new();

    for entry in entries {
        let canonical = serde_json::to_string(&entry)?;
        if seen.insert(canonical.clone()) {
            keyed.push((entry.kind().priority(), entry.timestamp, canonical, entry));
        }
    }

    keyed.sort_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)));

    let mut recordings = HashMap::new();
    for (_, _, _, entry) in keyed {
        apply_entry(&mut recordings, entry)?;
    }

    Ok(recordings)
}

/// Apply a single entry; entries must arrive in priority order
pub fn apply_entry(recordings: &mut HashMap<String, Recording>, entry: LogEntry) -> Result<()> {
    if let LogEvent::CreateRecording { build_id, .. } = &entry.event {
        recordings
            .entry(entry.id.clone())
            .or_insert_with(|| Recording::new(entry.id.clone(), build_id.clone(), entry.time()));
        return Ok(());
    }

    let recording_id = entry.recording_id().to_string();
    let recording = recordings.get_mut(&recording_id).ok_or_else(|| {
        UplinkError::InvariantViolation(format!(
            "Log entry {:?} references unknown recording {}",
            entry.kind(),
            recording_id
        ))
    })?;

    match entry.event {
        LogEvent::CreateRecording { .. } => {}
        LogEvent::AddMetadata { metadata } => recording.metadata.merge(&metadata),
        LogEvent::WriteStarted { path } => recording.path = Some(path),
        LogEvent::WriteFinished => {
            if recording.recording_status == RecordingStatus::Recording {
                recording.recording_status = RecordingStatus::Finished;
            }
        }
        LogEvent::Crashed => {
            if recording.recording_status != RecordingStatus::Unusable {
                recording.recording_status = RecordingStatus::Crashed;
            }
        }
        LogEvent::RecordingUnusable { reason } => {
            recording.recording_status = RecordingStatus::Unusable;
            recording.unusable_reason = Some(reason);
        }
        LogEvent::CrashData { data } => recording.crash_data.extend(data),
        LogEvent::CrashUploaded => recording.upload_status = UploadStatus::Uploaded,
        LogEvent::SourcemapAdded {
            path,
            base_url,
            target_content_hash,
            target_url_hash,
            target_map_url_hash,
            ..
        } => {
            let maps = &mut recording.metadata.source_maps;
            if !maps.iter().any(|m| m.id == entry.id) {
                maps.push(SourceMapEntry {
                    id: entry.id,
                    path,
                    base_url,
                    target_content_hash,
                    target_url_hash,
                    target_map_url_hash,
                    original_sources: Vec::new(),
                });
            }
        }
        LogEvent::OriginalSourceAdded {
            parent_id,
            path,
            parent_offset,
            ..
        } => {
            match recording
                .metadata
                .source_maps
                .iter_mut()
                .find(|m| m.id == parent_id)
            {
                Some(parent) => parent.original_sources.push(OriginalSourceEntry {
                    path,
                    parent_offset,
                }),
                None => warn!(
                    "Original source {} references unknown source map {} in recording {}",
                    path.display(),
                    parent_id,
                    recording_id
                ),
            }
        }
        LogEvent::UploadStarted { .. } => {
            if recording.upload_status != UploadStatus::Uploaded {
                recording.upload_status = UploadStatus::Uploading;
            }
        }
        LogEvent::UploadFinished => recording.upload_status = UploadStatus::Uploaded,
        LogEvent::UploadFailed { .. } => {
            if recording.upload_status != UploadStatus::Uploaded {
                recording.upload_status = UploadStatus::Failed;
            }
        }
        LogEvent::ProcessingStarted => {
            if recording.processing_status != ProcessingStatus::Processed {
                recording.processing_status = ProcessingStatus::Processing;
            }
        }
        LogEvent::ProcessingFinished => recording.processing_status = ProcessingStatus::Processed,
        LogEvent::ProcessingFailed { .. } => {
            if recording.processing_status != ProcessingStatus::Processed {
                recording.processing_status = ProcessingStatus::Failed;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn entry(id: &str, ts: i64, event: LogEvent) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: ts,
            event,
        }
    }

    fn lifecycle() -> Vec<LogEntry> {
        vec![
            entry(
                "r1",
                1,
                LogEvent::CreateRecording {
                    build_id: "b1".to_string(),
                    driver_version: None,
                },
            ),
            entry(
                "r1",
                2,
                LogEvent::AddMetadata {
                    metadata: json!({"host": "example.test", "processGroupId": "pg"})
                        .as_object()
                        .cloned()
                        .unwrap(),
                },
            ),
            entry(
                "r1",
                3,
                LogEvent::WriteStarted {
                    path: PathBuf::from("/tmp/r1.dat"),
                },
            ),
            entry(
                "sm1",
                4,
                LogEvent::SourcemapAdded {
                    recording_id: "r1".to_string(),
                    path: PathBuf::from("/tmp/sm1.map"),
                    base_url: "https://example.test/app.js".to_string(),
                    target_content_hash: None,
                    target_url_hash: None,
                    target_map_url_hash: None,
                },
            ),
            entry(
                "os1",
                5,
                LogEvent::OriginalSourceAdded {
                    recording_id: "r1".to_string(),
                    parent_id: "sm1".to_string(),
                    path: PathBuf::from("/tmp/app.ts"),
                    parent_offset: 0,
                },
            ),
            entry("r1", 6, LogEvent::WriteFinished),
            entry("r1", 7, LogEvent::UploadStarted { multipart: false }),
            entry("r1", 8, LogEvent::UploadFinished),
        ]
    }

    #[test]
    fn full_lifecycle_folds() {
        let recordings = fold_entries(lifecycle()).unwrap();
        let r = &recordings["r1"];

        assert_eq!(r.build_id, "b1");
        assert_eq!(r.recording_status, RecordingStatus::Finished);
        assert_eq!(r.upload_status, UploadStatus::Uploaded);
        assert_eq!(r.path, Some(PathBuf::from("/tmp/r1.dat")));
        assert_eq!(r.metadata.host.as_deref(), Some("example.test"));
        assert_eq!(r.metadata.source_maps.len(), 1);
        assert_eq!(r.metadata.source_maps[0].original_sources.len(), 1);
    }

    #[test]
    fn unknown_recording_is_an_invariant_violation() {
        let entries = vec![entry("ghost", 1, LogEvent::WriteFinished)];
        assert!(matches!(
            fold_entries(entries),
            Err(UplinkError::InvariantViolation(_))
        ));
    }

    #[test]
    fn uploaded_never_regresses() {
        let mut entries = lifecycle();
        entries.push(entry("r1", 9, LogEvent::UploadFailed { error: None }));
        entries.push(entry("r1", 10, LogEvent::UploadStarted { multipart: true }));

        let recordings = fold_entries(entries).unwrap();
        assert_eq!(recordings["r1"].upload_status, UploadStatus::Uploaded);
    }

    #[test]
    fn terminal_capture_status_is_kept() {
        let mut entries = lifecycle();
        entries.push(entry(
            "r1",
            9,
            LogEvent::RecordingUnusable {
                reason: "empty".to_string(),
            },
        ));
        entries.push(entry("r1", 10, LogEvent::Crashed));

        let r = &fold_entries(entries).unwrap()["r1"];
        assert_eq!(r.recording_status, RecordingStatus::Unusable);
        assert_eq!(r.unusable_reason.as_deref(), Some("empty"));
    }

    #[test]
    fn duplicated_lines_fold_once() {
        let mut entries = lifecycle();
        let crash = entry(
            "r1",
            11,
            LogEvent::CrashData {
                data: vec![json!({"blob": 1})],
            },
        );
        entries.push(crash.clone());
        entries.push(crash);

        let r = &fold_entries(entries).unwrap()["r1"];
        assert_eq!(r.crash_data.len(), 1);
    }

    proptest! {
        #[test]
        fn fold_is_order_independent(seed in any::<u64>()) {
            use rand::seq::SliceRandom;
            use rand::SeedableRng;

            let mut shuffled = lifecycle();
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            shuffled.shuffle(&mut rng);

            let expected = serde_json::to_value(&fold_entries(lifecycle()).unwrap()["r1"]).unwrap();
            let actual = serde_json::to_value(&fold_entries(shuffled).unwrap()["r1"]).unwrap();
            prop_assert_eq!(expected, actual);
        }
    }
}
