// src/upload/multipart.rs
//! Multipart transfer of one recording file
//!
//! Each part is an independent ranged PUT executed on the batch-wide part
//! queue and retried with linear backoff. The first part that fails for good
//! cancels the remaining parts of the same recording; other recordings
//! sharing the queue are not affected.

use crate::observability::PARTS_UPLOADED;
use crate::protocol::api::MultipartTicket;
use crate::runtime::retry::{retry_with_linear_backoff, RetryPolicy};
use crate::runtime::work_queue::WorkQueue;
use crate::upload::http::ByteUploader;
use crate::utils::errors::{Result, UplinkError};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

/// Split `size` bytes into `chunk_size` parts, one per server-issued link
pub fn plan_parts(size: u64, chunk_size: u64, links: usize) -> Result<Vec<PartPlan>> {
    if chunk_size == 0 {
        return Err(UplinkError::InvariantViolation(
            "Multipart chunk size must be positive".to_string(),
        ));
    }

    let count = size.div_ceil(chunk_size).max(1) as usize;
    if count != links {
        return Err(UplinkError::InvariantViolation(format!(
            "Server issued {} part links for {} parts ({} bytes / {} byte chunks)",
            links, count, size, chunk_size
        )));
    }

    Ok((0..count)
        .map(|index| {
            let offset = index as u64 * chunk_size;
            PartPlan {
                index,
                offset,
                len: chunk_size.min(size - offset),
            }
        })
        .collect())
}

/// Read one part's bytes from disk
pub async fn read_range(path: &Path, offset: u64, len: u64) -> Result<Bytes> {
    let mut file = File::open(path)
        .await
        .map_err(|e| UplinkError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| UplinkError::io(path, e))?;

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| UplinkError::io(path, e))?;
    Ok(Bytes::from(buf))
}

async fn put_part(
    uploader: &dyn ByteUploader,
    path: &Path,
    url: &str,
    plan: PartPlan,
) -> Result<String> {
    let body = read_range(path, plan.offset, plan.len).await?;
    let response = uploader.put(url, body).await?;
    response.etag.ok_or(UplinkError::MissingEtag(plan.index))
}

/// Uploads the parts of one recording through a shared [`WorkQueue`]
#[derive(Clone)]
pub struct MultipartUploader {
    uploader: Arc<dyn ByteUploader>,
    queue: WorkQueue,
    policy: RetryPolicy,
}

impl MultipartUploader {
    pub fn new(uploader: Arc<dyn ByteUploader>, queue: WorkQueue, policy: RetryPolicy) -> Self {
        Self {
            uploader,
            queue,
            policy,
        }
    }

    /// Upload every part and return the ETags in part order.
    ///
    /// `cancel` is the recording's token; cancelling it stops the remaining
    /// parts, and a failing part cancels a child of it.
    pub async fn upload(
        &self,
        path: &Path,
        size: u64,
        ticket: &MultipartTicket,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let plans = plan_parts(size, ticket.chunk_size, ticket.part_links.len())?;
        info!(
            "Uploading {} in {} parts of {} bytes",
            ticket.recording_id,
            plans.len(),
            ticket.chunk_size
        );

        let siblings = cancel.child_token();
        let mut group = self.queue.fork::<(usize, Result<String>)>();

        for (plan, url) in plans.into_iter().zip(ticket.part_links.iter().cloned()) {
            let uploader = Arc::clone(&self.uploader);
            let policy = self.policy.clone();
            let path: PathBuf = path.to_path_buf();
            let token = siblings.clone();

            group.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(UplinkError::Cancelled),
                    r = retry_with_linear_backoff(&policy, "multipart part", || {
                        put_part(uploader.as_ref(), &path, &url, plan)
                    }) => r,
                };

                match &result {
                    Ok(_) => {
                        metrics::counter!(PARTS_UPLOADED).increment(1);
                        debug!("Part {} uploaded", plan.index);
                    }
                    Err(UplinkError::Cancelled) => debug!("Part {} cancelled", plan.index),
                    Err(e) => {
                        warn!("Part {} failed, cancelling siblings: {}", plan.index, e);
                        token.cancel();
                    }
                }
                (plan.index, result)
            });
        }

        let mut outcomes = group.wait_idle().await?;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut etags = Vec::with_capacity(outcomes.len());
        let mut cancelled = false;
        for (_, result) in outcomes {
            match result {
                Ok(etag) => etags.push(etag),
                Err(UplinkError::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
            }
        }

        if cancelled {
            return Err(UplinkError::Cancelled);
        }
        Ok(etags)
    }
}
