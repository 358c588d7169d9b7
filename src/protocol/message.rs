// src/protocol/message.rs
//! Wire messages exchanged with the ingestion service
//!
//! Outbound: `{id, method, params, sessionId?}`.
//! Inbound: `{id, result}`, `{id, error}` or an uncorrelated `{method, params}` event.

use crate::utils::errors::{Result, UplinkError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code the service returns when the access token is missing or rejected
pub const AUTHENTICATION_REQUIRED: i64 = 49;

/// Server-pushed event that fails every pending command of one session
pub const SESSION_ERROR_EVENT: &str = "Recording.sessionError";

/// Method names used by the upload pipeline
pub mod methods {
    pub const SET_ACCESS_TOKEN: &str = "Authentication.setAccessToken";
    pub const BEGIN_RECORDING_UPLOAD: &str = "Internal.beginRecordingUpload";
    pub const END_RECORDING_UPLOAD: &str = "Internal.endRecordingUpload";
    pub const BEGIN_RECORDING_MULTIPART_UPLOAD: &str = "Internal.beginRecordingMultipartUpload";
    pub const END_RECORDING_MULTIPART_UPLOAD: &str = "Internal.endRecordingMultipartUpload";
    pub const SET_RECORDING_METADATA: &str = "Internal.setRecordingMetadata";
    pub const PROCESS_RECORDING: &str = "Internal.processRecording";
    pub const REPORT_CRASH: &str = "Internal.reportCrash";
    pub const ADD_SOURCE_MAP: &str = "Recording.addSourceMap";
    pub const ADD_ORIGINAL_SOURCE: &str = "Recording.addOriginalSource";
    pub const RESOURCE_TOKEN: &str = "Resource.token";
    pub const RESOURCE_EXISTS: &str = "Resource.exists";
    pub const RESOURCE_CREATE: &str = "Resource.create";
}

/// Structured error carried by a correlated error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn is_authentication_required(&self) -> bool {
        self.code == AUTHENTICATION_REQUIRED
    }
}

/// A command as written to the connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    pub id: u64,
    pub method: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A message read from the connection
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response { id: u64, result: Value },
    Error { id: u64, error: ProtocolError },
    Event { method: String, params: Value },
}

#[derive(Deserialize)]
struct RawInbound {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProtocolError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl InboundMessage {
    /// Parse one line received from the service
    pub fn parse(line: &str) -> Result<Self> {
        let raw: RawInbound = serde_json::from_str(line)?;

        match (raw.id, raw.error, raw.method) {
            (Some(id), Some(error), _) => Ok(InboundMessage::Error { id, error }),
            (Some(id), None, _) => Ok(InboundMessage::Response {
                id,
                result: raw.result.unwrap_or(Value::Null),
            }),
            (None, _, Some(method)) => Ok(InboundMessage::Event {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, _, None) => Err(UplinkError::Serialization(format!(
                "Message has neither id nor method: {}",
                line
            ))),
        }
    }
}

/// Payload of [`SESSION_ERROR_EVENT`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorParams {
    pub session_id: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
