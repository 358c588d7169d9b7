// src/upload/mod.rs
//! Upload pipeline
//!
//! - **Http**: `ByteUploader` and its hyper implementation
//! - **Metadata**: filtering of user metadata before it is sent
//! - **Multipart**: part planning and bounded parallel part transfer
//! - **Source maps**: best-effort, content-addressed source uploads
//! - **Coordinator**: per-recording state machine
//! - **Batch**: concurrent upload of many recordings

pub mod batch;
pub mod coordinator;
pub mod http;
pub mod metadata;
pub mod multipart;
pub mod source_maps;

pub use batch::{upload_recordings, BatchReport};
pub use coordinator::{UploadCoordinator, UploadOptions};
pub use http::{ByteUploader, HyperUploader, PutResponse};
pub use metadata::sanitize_metadata;
pub use multipart::{plan_parts, MultipartUploader, PartPlan};
pub use source_maps::{content_hash, upload_source_maps, SourceMapSummary};
