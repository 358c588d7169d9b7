// src/upload/metadata.rs
//! Metadata filtering before `setRecordingMetadata`

use serde_json::{Map, Value};
use tracing::warn;

const STRING_KEYS: [&str; 4] = ["title", "host", "uri", "processType"];
const SECTION_KEYS: [&str; 2] = ["source", "test"];
const CUSTOM_PREFIX: &str = "x-";

/// Keep only the metadata the service accepts.
///
/// String fields must be strings, `source` and `test` must be objects and
/// custom keys must start with `x-`. Everything else is dropped.
pub fn sanitize_metadata(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut clean = Map::new();

    for (key, value) in raw {
        let keep = if STRING_KEYS.contains(&key.as_str()) {
            value.is_string()
        } else if SECTION_KEYS.contains(&key.as_str()) {
            value.is_object()
        } else {
            key.starts_with(CUSTOM_PREFIX)
        };

        if keep {
            clean.insert(key.clone(), value.clone());
        } else {
            warn!("Ignoring metadata key \"{}\"", key);
        }
    }

    clean
}
