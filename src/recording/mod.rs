// src/recording/mod.rs
//! Local recording database
//!
//! Recordings are never stored directly. The recorder and this crate append
//! events to `recordings.log`, and the current state of every recording is
//! rebuilt by folding those events:
//!
//! - **Log entry**: the tagged record written per line
//! - **Repair**: recovery of lines merged by older writers
//! - **Fold**: priority-ordered reduction into `Recording` entities
//! - **Storage**: the `RecordingLog` store (read, append, delete)
//! - **Exporter**: JSON and table listings
//!
//! # Architecture
//!
//! ```text
//! recordings.log ──► repair ──► dedupe + sort by kind priority ──► fold
//!       ▲                                                            │
//!       └──────────── append_entry / remove_from_disk ◄── callers ◄──┘
//! ```

pub mod exporter;
pub mod fold;
pub mod log_entry;
pub mod repair;
pub mod storage;
pub mod types;

pub use exporter::{ExportFormat, RecordingExporter};
pub use fold::fold_entries;
pub use log_entry::{LogEntry, LogEvent, LogKind};
pub use storage::RecordingLog;
pub use types::{
    OriginalSourceEntry, ProcessingStatus, Recording, RecordingMetadata, RecordingStatus,
    SourceMapEntry, UploadStatus,
};
