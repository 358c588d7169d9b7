// src/upload/source_maps.rs
//! Best-effort source map upload with content-addressed de-duplication
//!
//! For every blob: hash it, ask for a resource token, and only send the
//! bytes if the service does not already have them. A source map is
//! attached before any of its original sources.

use crate::protocol::api::{ResourceRef, SourceMapRequest, UplinkApi};
use crate::recording::types::{Recording, SourceMapEntry};
use crate::runtime::work_queue::WorkQueue;
use crate::utils::errors::{Result, UplinkError};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Content hash in the form the service expects
pub fn content_hash(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// Counts of source maps handled for one recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMapSummary {
    pub uploaded: usize,
    pub failed: usize,
}

/// Make sure the service stores `content`; returns its resource handle
pub async fn ensure_resource(api: &UplinkApi, content: &str) -> Result<ResourceRef> {
    let resource = ResourceRef {
        hash: content_hash(content.as_bytes()),
    };
    let token = api.get_resource_token(&resource).await?;

    if api.resource_exists(&resource, &token).await? {
        debug!("Resource {} already stored", resource.hash);
        return Ok(resource);
    }

    api.create_resource(content).await
}

async fn read_text(path: &std::path::Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| UplinkError::io(path, e))
}

async fn upload_source_map(api: &UplinkApi, recording_id: &str, map: &SourceMapEntry) -> Result<()> {
    let content = read_text(&map.path).await?;
    let resource = ensure_resource(api, &content).await?;

    let parent_id = api
        .add_source_map(&SourceMapRequest {
            recording_id: recording_id.to_string(),
            resource,
            base_url: map.base_url.clone(),
            target_content_hash: map.target_content_hash.clone(),
            target_url_hash: map.target_url_hash.clone(),
            target_map_url_hash: map.target_map_url_hash.clone(),
        })
        .await?;

    for source in &map.original_sources {
        let content = read_text(&source.path).await?;
        let resource = ensure_resource(api, &content).await?;
        api.add_original_source(recording_id, &resource, &parent_id, source.parent_offset)
            .await?;
    }

    Ok(())
}

/// Upload every source map of `recording` on a group forked from `queue`.
///
/// Failures are logged and counted, never returned.
pub async fn upload_source_maps(
    api: &UplinkApi,
    queue: &WorkQueue,
    recording: &Recording,
) -> SourceMapSummary {
    let maps = &recording.metadata.source_maps;
    if maps.is_empty() {
        return SourceMapSummary::default();
    }

    info!("Uploading {} source maps for {}", maps.len(), recording.id);
    let mut group = queue.fork::<(String, Result<()>)>();

    for map in maps.iter().cloned() {
        let api = api.clone();
        let recording_id = recording.id.clone();
        group.spawn(async move {
            let result = upload_source_map(&api, &recording_id, &map).await;
            (map.id, result)
        });
    }

    let mut summary = SourceMapSummary::default();
    match group.wait_idle().await {
        Ok(outcomes) => {
            for (id, result) in outcomes {
                match result {
                    Ok(()) => summary.uploaded += 1,
                    Err(e) => {
                        warn!("Failed to upload source map {} for {}: {}", id, recording.id, e);
                        summary.failed += 1;
                    }
                }
            }
        }
        Err(e) => {
            warn!("Source map uploads for {} did not complete: {}", recording.id, e);
            summary.failed = maps.len() - summary.uploaded;
        }
    }

    summary
}
