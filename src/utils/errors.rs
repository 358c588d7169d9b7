// src/utils/errors.rs
//! Error taxonomy for the recording store and upload pipeline
//!
//! Errors are `Clone` so that a single failure can settle a shared completion
//! handle that several tasks are waiting on.

use crate::protocol::message::ProtocolError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, UplinkError>;

/// Errors produced by the recording store and upload pipeline
#[derive(Debug, Clone, Error)]
pub enum UplinkError {
    /// Local filesystem failure other than a missing file
    #[error("I/O error: {0}")]
    Io(String),

    /// A file the pipeline depends on does not exist (never retried)
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The recording log could not be read or rewritten
    #[error("Recording log corrupted: {0}")]
    LogCorrupted(String),

    /// A logic defect: unknown recording id, unmatched correlation id, ...
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Structured error returned by the remote service
    #[error("Protocol error {}: {}", .0.code, .0.message)]
    Protocol(ProtocolError),

    /// Server-pushed failure scoped to one session
    #[error("Session {session_id} failed ({code}): {message}")]
    SessionError {
        session_id: String,
        code: i64,
        message: String,
    },

    /// The persistent connection went away
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The access token was rejected; the whole batch is aborted
    #[error("Authentication failed: {0}. Your access token may be expired or invalid")]
    AuthenticationRequired(String),

    /// HTTP byte transfer failed
    #[error("Transfer failed{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Transfer {
        status: Option<u16>,
        message: String,
    },

    /// A multipart part response did not carry an ETag
    #[error("Missing ETag header in response for part {0}")]
    MissingEtag(usize),

    /// The operation was aborted by a sibling failure
    #[error("Operation cancelled")]
    Cancelled,

    /// A completion handle was resolved or rejected twice
    #[error("Completion handle already settled")]
    AlreadySettled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl UplinkError {
    /// Map an I/O error on `path`, keeping missing files distinguishable
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            UplinkError::FileNotFound(path.to_path_buf())
        } else {
            UplinkError::Io(format!("{}: {}", path.display(), err))
        }
    }

    /// Whether a retry wrapper should attempt the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            UplinkError::Io(_) => true,
            UplinkError::Transfer { .. } => true,
            UplinkError::MissingEtag(_) => true,
            UplinkError::Protocol(e) => !e.is_authentication_required(),
            UplinkError::SessionError { .. } => true,
            UplinkError::ConnectionClosed(_) => false,
            UplinkError::FileNotFound(_) => false,
            UplinkError::LogCorrupted(_) => false,
            UplinkError::InvariantViolation(_) => false,
            UplinkError::AuthenticationRequired(_) => false,
            UplinkError::Cancelled => false,
            UplinkError::AlreadySettled => false,
            UplinkError::Timeout(_) => true,
            UplinkError::Config(_) => false,
            UplinkError::Serialization(_) => false,
        }
    }

    /// Whether this error means the access token was rejected
    pub fn is_authentication_required(&self) -> bool {
        match self {
            UplinkError::AuthenticationRequired(_) => true,
            UplinkError::Protocol(e) => e.is_authentication_required(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for UplinkError {
    fn from(err: std::io::Error) -> Self {
        UplinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for UplinkError {
    fn from(err: serde_json::Error) -> Self {
        UplinkError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for UplinkError {
    fn from(err: config::ConfigError) -> Self {
        UplinkError::Config(err.to_string())
    }
}

impl From<ProtocolError> for UplinkError {
    fn from(err: ProtocolError) -> Self {
        UplinkError::Protocol(err)
    }
}
