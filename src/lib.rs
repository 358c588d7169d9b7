// src/lib.rs
//! Recording Uplink Library
//!
//! Keeps track of locally captured recordings and ships them to the
//! ingestion service.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **recording**: event-sourced recording log (read, append, delete)
//! - **protocol**: persistent RPC connection with correlated commands
//! - **upload**: per-recording upload state machine and batch orchestration
//! - **telemetry**: collaborator interfaces and the authenticated task queue
//! - **runtime**: completion handles, retries, timeouts, bounded work queues
//! - **observability**: tracing and metrics
//! - **utils**: errors and configuration

pub mod observability;
pub mod protocol;
pub mod recording;
pub mod runtime;
pub mod telemetry;
pub mod upload;
pub mod utils;

// Re-export commonly used types
pub use protocol::{ProtocolClient, UplinkApi};
pub use recording::{Recording, RecordingLog};
pub use upload::{upload_recordings, BatchReport, UploadCoordinator};
pub use utils::config::UplinkConfig;
pub use utils::errors::{Result, UplinkError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// `User-Agent` sent with every byte transfer
pub const USER_AGENT: &str = concat!(
    "recording-uplink/",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ")"
);

/// Build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_version_and_commit() {
        assert!(USER_AGENT.starts_with(&format!("recording-uplink/{} (", VERSION)));
        assert!(USER_AGENT.ends_with(&format!("{})", GIT_HASH)));
    }

    #[test]
    fn build_info_is_populated() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.rustc_version.is_empty());
    }
}
