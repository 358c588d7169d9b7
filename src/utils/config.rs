// src/utils/config.rs
//! Layered configuration: defaults, optional `uplink.toml`, then `UPLINK_*`
//! environment variables (`__` separates sections, e.g.
//! `UPLINK_UPLOAD__PART_CONCURRENCY=4`).

use crate::runtime::retry::{Backoff, RetryPolicy};
use crate::utils::errors::{Result, UplinkError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the append-only log inside the recordings directory
pub const LOG_FILE_NAME: &str = "recordings.log";

/// Default multipart threshold and preferred chunk size (5 MiB)
pub const DEFAULT_MULTIPART_MIN_SIZE: u64 = 5 * 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Directory holding `recordings.log` and recording data files
    pub recordings_dir: PathBuf,

    pub server: ServerConfig,

    pub upload: UploadConfig,

    pub retry: RetryConfig,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_recordings_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".replay")
}

/// Remote service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` of the protocol endpoint
    pub address: String,

    /// Access token sent in the authentication handshake
    pub access_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".to_string(),
            access_token: None,
        }
    }
}

/// What to do once a recording has been uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    None,
    /// Fire-and-forget processing request
    Start,
    /// Request processing and wait for the result
    Wait,
}

/// Upload pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Files strictly larger than this use multipart when the flag allows it
    pub multipart_min_size: u64,

    /// Feature flag consulted before choosing multipart
    pub multipart_flag: String,

    /// Concurrent part transfers shared by every recording in a batch
    pub part_concurrency: usize,

    /// Concurrent source-map uploads
    pub source_map_concurrency: usize,

    /// Chunk size requested from the server for multipart uploads
    pub preferred_chunk_size: u64,

    /// Delete local artifacts of recordings that were uploaded
    pub remove_after_upload: bool,

    pub processing: ProcessingMode,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_min_size: DEFAULT_MULTIPART_MIN_SIZE,
            multipart_flag: "cli_multipart_upload".to_string(),
            part_concurrency: 10,
            source_map_concurrency: 5,
            preferred_chunk_size: DEFAULT_MULTIPART_MIN_SIZE,
            remove_after_upload: false,
            processing: ProcessingMode::None,
        }
    }
}

/// Retry settings for one backoff strategy.
///
/// Missing fields fall back to the exponential defaults; `load` layers the
/// per-strategy defaults underneath so a partial table keeps its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    fn to_policy(&self, backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            backoff,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts.max(1),
            jitter_percent: 0.1,
        }
    }
}

/// Backoff policies for RPC calls and part transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Used for metadata, processing, single-shot transfers and crash reports
    pub exponential: RetrySettings,

    /// Used for multipart part transfers
    pub linear: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            exponential: RetrySettings::default(),
            linear: RetrySettings {
                max_attempts: 5,
                base_delay_ms: 500,
                max_delay_ms: 10_000,
            },
        }
    }
}

impl RetryConfig {
    pub fn exponential_policy(&self) -> RetryPolicy {
        self.exponential.to_policy(Backoff::Exponential)
    }

    pub fn linear_policy(&self) -> RetryPolicy {
        self.linear.to_policy(Backoff::Linear)
    }
}

impl UplinkConfig {
    /// Load configuration from `UPLINK_CONFIG` (or `uplink.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("UPLINK_CONFIG").unwrap_or_else(|_| "uplink".to_string());

        let config: UplinkConfig = Config::builder()
            .add_source(Config::try_from(&UplinkConfig::default())?)
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("UPLINK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.upload.part_concurrency == 0 {
            return Err(UplinkError::Config(
                "upload.part_concurrency must be at least 1".to_string(),
            ));
        }
        if self.upload.source_map_concurrency == 0 {
            return Err(UplinkError::Config(
                "upload.source_map_concurrency must be at least 1".to_string(),
            ));
        }
        if self.upload.preferred_chunk_size == 0 {
            return Err(UplinkError::Config(
                "upload.preferred_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.server.address.is_empty() {
            return Err(UplinkError::Config("server.address is empty".to_string()));
        }
        Ok(())
    }

    /// Full path of the recording log
    pub fn log_path(&self) -> PathBuf {
        self.recordings_dir.join(LOG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = UplinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.part_concurrency, 10);
        assert_eq!(config.upload.multipart_min_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.processing, ProcessingMode::None);
        assert!(config.log_path().ends_with("recordings.log"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = UplinkConfig::default();
        config.upload.part_concurrency = 0;
        assert!(matches!(config.validate(), Err(UplinkError::Config(_))));
    }

    #[test]
    fn retry_policies_follow_settings() {
        let retry = RetryConfig::default();
        let exp = retry.exponential_policy();
        assert_eq!(exp.backoff, Backoff::Exponential);
        assert_eq!(exp.max_attempts, 5);
        assert_eq!(exp.base_delay, Duration::from_millis(100));

        let lin = retry.linear_policy();
        assert_eq!(lin.backoff, Backoff::Linear);
        assert_eq!(lin.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: UplinkConfig = Config::builder()
            .add_source(config::File::from_str(
                "[upload]\npart_concurrency = 3\nprocessing = \"wait\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.upload.part_concurrency, 3);
        assert_eq!(config.upload.processing, ProcessingMode::Wait);
        assert_eq!(config.upload.source_map_concurrency, 5);
        assert_eq!(config.retry.exponential.max_attempts, 5);
    }

    #[test]
    fn partial_retry_table_keeps_other_fields() {
        let config: UplinkConfig = Config::builder()
            .add_source(config::File::from_str(
                "[retry.exponential]\nmax_attempts = 2\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.retry.exponential.max_attempts, 2);
        assert_eq!(config.retry.exponential.base_delay_ms, 100);
        assert_eq!(config.retry.linear.base_delay_ms, 500);
    }

    // Everything touching process env lives in this one test.
    #[test]
    fn load_layers_file_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("uplink.toml");
        std::fs::write(&file, "[retry.linear]\nmax_attempts = 9\n").unwrap();

        std::env::set_var("UPLINK_CONFIG", file.to_str().unwrap());
        std::env::set_var("UPLINK_UPLOAD__PART_CONCURRENCY", "4");
        std::env::set_var("UPLINK_SERVER__ACCESS_TOKEN", "tok");
        let loaded = UplinkConfig::load();
        std::env::remove_var("UPLINK_CONFIG");
        std::env::remove_var("UPLINK_UPLOAD__PART_CONCURRENCY");
        std::env::remove_var("UPLINK_SERVER__ACCESS_TOKEN");

        let config = loaded.unwrap();
        assert_eq!(config.upload.part_concurrency, 4);
        assert_eq!(config.server.access_token.as_deref(), Some("tok"));
        assert_eq!(config.upload.source_map_concurrency, 5);
        assert_eq!(config.retry.linear.max_attempts, 9);
        assert_eq!(config.retry.linear.base_delay_ms, 500);
    }
}
