// src/recording/exporter.rs
//! Render recording listings for humans and scripts
//!
//! Supports:
//! - JSON (full entity, for scripting)
//! - Table (one line per recording, for terminals)

use crate::recording::types::Recording;
use crate::utils::errors::{Result, UplinkError};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Table,
}

/// Exporter for recording listings
pub struct RecordingExporter {
    format: ExportFormat,
}

impl RecordingExporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Render `recordings` relative to the current time
    pub fn export(&self, recordings: &[Recording]) -> Result<String> {
        self.export_at(recordings, Utc::now())
    }

    /// Render `recordings`, computing ages against `now`
    pub fn export_at(&self, recordings: &[Recording], now: DateTime<Utc>) -> Result<String> {
        debug!("Exporting {} recordings as {:?}", recordings.len(), self.format);

        match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(recordings).map_err(|e| {
                UplinkError::Serialization(format!("JSON serialization error: {}", e))
            }),
            ExportFormat::Table => Ok(render_table(recordings, now)),
        }
    }
}

const HEADERS: [&str; 5] = ["ID", "STATUS", "UPLOAD", "HOST", "CREATED"];

fn render_table(recordings: &[Recording], now: DateTime<Utc>) -> String {
    let rows: Vec<[String; 5]> = recordings
        .iter()
        .map(|r| {
            [
                r.id.clone(),
                r.recording_status.as_str().to_string(),
                r.upload_status.as_str().to_string(),
                r.metadata.host.clone().unwrap_or_else(|| "-".to_string()),
                format_age(now - r.create_time),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths.iter()).enumerate() {
        if i + 1 == cells.len() {
            line.push_str(cell);
        } else {
            let _ = write!(line, "{:<width$}  ", cell, width = *width);
        }
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
