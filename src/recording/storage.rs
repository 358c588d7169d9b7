// src/recording/storage.rs
//! Recording log store
//!
//! The log file is the only source of truth: it is re-read top to bottom on
//! every query and only ever appended to, except for the explicit delete
//! operations which rewrite it without the removed recording's lines.

use crate::observability::LOG_LINES_DROPPED;
use crate::recording::fold::fold_entries;
use crate::recording::log_entry::{LogEntry, LogEvent};
use crate::recording::repair::{parse_log_text, ParsedLog};
use crate::recording::types::{Recording, RecordingStatus};
use crate::utils::config::{UplinkConfig, LOG_FILE_NAME};
use crate::utils::errors::{Result, UplinkError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Event-sourced store over `recordings.log`
pub struct RecordingLog {
    dir: PathBuf,
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordingLog {
    /// Store rooted at `dir`, using `dir/recordings.log`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let log_path = dir.join(LOG_FILE_NAME);
        Self {
            dir,
            log_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &UplinkConfig) -> Self {
        Self::new(config.recordings_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    async fn read_text(&self) -> Result<String> {
        match fs::read_to_string(&self.log_path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(UplinkError::io(&self.log_path, e)),
        }
    }

    async fn read_parsed(&self) -> Result<ParsedLog> {
        let text = self.read_text().await?;
        let parsed = parse_log_text(&text);

        for dropped in &parsed.dropped {
            warn!(
                "Dropping unparsable line from {}: {}",
                self.log_path.display(),
                truncate(dropped, 120)
            );
        }
        if !parsed.dropped.is_empty() {
            metrics::counter!(LOG_LINES_DROPPED).increment(parsed.dropped.len() as u64);
        }

        Ok(parsed)
    }

    /// Every entry that could be parsed, in file order
    pub async fn read_log(&self) -> Result<Vec<LogEntry>> {
        let parsed = self.read_parsed().await?;
        Ok(parsed.entries.into_iter().map(|line| line.entry).collect())
    }

    /// Recordings newest first, optionally restricted to one process group.
    ///
    /// Finished recordings without host metadata (blank tabs and the like)
    /// are left out; crashed and unusable recordings are always listed.
    pub async fn get_recordings(&self, process_group_id: Option<&str>) -> Result<Vec<Recording>> {
        let entries = self.read_log().await?;
        let mut recordings: Vec<Recording> = fold_entries(entries)?.into_values().collect();

        recordings.sort_by(|a, b| b.create_time.cmp(&a.create_time).then_with(|| a.id.cmp(&b.id)));

        let recordings: Vec<Recording> = recordings
            .into_iter()
            .filter(|r| match process_group_id {
                Some(pg) => r.metadata.process_group_id.as_deref() == Some(pg),
                None => true,
            })
            .filter(|r| {
                r.recording_status != RecordingStatus::Finished || r.metadata.host.is_some()
            })
            .collect();

        debug!("Loaded {} recordings from {}", recordings.len(), self.log_path.display());
        Ok(recordings)
    }

    /// Look up one recording by id
    pub async fn get_recording(&self, id: &str) -> Result<Option<Recording>> {
        let entries = self.read_log().await?;
        Ok(fold_entries(entries)?.remove(id))
    }

    /// Append `event` for `recording_id`, stamped with the current time
    pub async fn append_entry(&self, recording_id: &str, event: LogEvent) -> Result<LogEntry> {
        let entry = LogEntry::now(recording_id, event);
        self.append(&entry).await?;
        Ok(entry)
    }

    /// Append a fully formed entry as one line
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UplinkError::io(&self.dir, e))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| UplinkError::io(&self.log_path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| UplinkError::io(&self.log_path, e))?;
        file.flush()
            .await
            .map_err(|e| UplinkError::io(&self.log_path, e))?;

        debug!("Appended {:?} for {}", entry.kind(), entry.recording_id());
        Ok(())
    }

    /// Delete a recording's data file, the source files only it references,
    /// and every log line belonging to it.
    pub async fn remove_from_disk(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let parsed = self.read_parsed().await?;
        let recordings = fold_entries(parsed.entries.iter().map(|line| line.entry.clone()))?;

        match recordings.get(id) {
            Some(target) => {
                if let Some(path) = &target.path {
                    remove_file_if_exists(path).await?;
                }

                let shared: HashSet<PathBuf> = recordings
                    .values()
                    .filter(|r| r.id != id)
                    .flat_map(|r| r.source_file_paths())
                    .collect();

                for path in target.source_file_paths() {
                    if shared.contains(&path) {
                        debug!("Keeping {} (still referenced)", path.display());
                    } else {
                        remove_file_if_exists(&path).await?;
                    }
                }
            }
            None => warn!("Recording {} not found in log; pruning lines only", id),
        }

        let mut kept = String::new();
        for line in &parsed.entries {
            if line.entry.recording_id() != id {
                kept.push_str(&line.raw);
                kept.push('\n');
            }
        }
        for raw in &parsed.dropped {
            kept.push_str(raw);
            kept.push('\n');
        }

        self.replace_log(&kept).await?;
        info!("Removed recording {} from disk", id);
        Ok(())
    }

    /// Delete every recording's files and empty the log
    pub async fn remove_all_from_disk(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let entries = self.read_log().await?;
        let recordings = fold_entries(entries)?;

        let mut paths: HashSet<PathBuf> = HashSet::new();
        for recording in recordings.values() {
            if let Some(path) = &recording.path {
                paths.insert(path.clone());
            }
            paths.extend(recording.source_file_paths());
        }

        for path in &paths {
            remove_file_if_exists(path).await?;
        }

        self.replace_log("").await?;
        info!("Removed {} recordings from disk", recordings.len());
        Ok(())
    }

    /// Atomically swap the log contents
    async fn replace_log(&self, contents: &str) -> Result<()> {
        let tmp = self.log_path.with_extension("log.tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| UplinkError::io(&tmp, e))?;
        fs::rename(&tmp, &self.log_path)
            .await
            .map_err(|e| UplinkError::LogCorrupted(format!("Failed to replace log: {}", e)))?;
        Ok(())
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UplinkError::io(path, e)),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
