// src/recording/repair.rs
//! Parsing of raw log text, including recovery of merged lines
//!
//! Older writers occasionally appended two entries without a newline between
//! them (`{...}{...}`). Such a line is split at every `}{` boundary and each
//! piece parsed on its own. Pieces that still fail are reported as dropped.

use crate::recording::log_entry::LogEntry;

/// A parsed entry together with the exact text it came from
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub raw: String,
    pub entry: LogEntry,
}

/// Result of parsing a whole log file
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub entries: Vec<ParsedLine>,
    /// Text that could not be parsed even after repair
    pub dropped: Vec<String>,
}

/// Split a line that failed to parse into candidate entries.
///
/// Returns `None` when the line has no `}{` boundary to repair.
pub fn repair_candidates(line: &str) -> Option<Vec<String>> {
    if !line.contains("}{") {
        return None;
    }

    Some(
        line.replace("}{", "}\n{")
            .split('\n')
            .map(|piece| piece.trim().to_string())
            .filter(|piece| !piece.is_empty())
            .collect(),
    )
}

/// Parse one physical line into zero or more entries
pub fn parse_line(line: &str, out: &mut ParsedLog) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if let Ok(entry) = serde_json::from_str::<LogEntry>(line) {
        out.entries.push(ParsedLine {
            raw: line.to_string(),
            entry,
        });
        return;
    }

    let candidates = repair_candidates(line).unwrap_or_else(|| vec![line.to_string()]);
    for candidate in candidates {
        match serde_json::from_str::<LogEntry>(&candidate) {
            Ok(entry) => out.entries.push(ParsedLine {
                raw: candidate,
                entry,
            }),
            Err(_) => out.dropped.push(candidate),
        }
    }
}

/// Parse the full text of a log file
pub fn parse_log_text(text: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    for line in text.lines() {
        parse_line(line, &mut parsed);
    }
    parsed
}
