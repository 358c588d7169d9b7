//! Shared fixtures: an in-process protocol server and an in-memory uploader

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use recording_uplink::protocol::message::AUTHENTICATION_REQUIRED;
use recording_uplink::recording::{LogEntry, LogEvent, RecordingLog};
use recording_uplink::runtime::RetryPolicy;
use recording_uplink::upload::{ByteUploader, PutResponse, UploadOptions};
use recording_uplink::utils::config::ProcessingMode;
use recording_uplink::{ProtocolClient, Result, UplinkError};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::{Framed, LinesCodec};

pub type Calls = Arc<Mutex<Vec<(String, Value)>>>;

/// Runs before the fake service answers a call
pub type CallHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Behaviour switches for the in-process service
#[derive(Clone)]
pub struct FakeService {
    pub accept_token: bool,
    /// `Resource.exists` answers `true` for every hash
    pub resources_exist: bool,
    /// `Internal.processRecording` returns a retryable error
    pub fail_processing: bool,
    pub on_call: Option<CallHook>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            accept_token: true,
            resources_exist: false,
            fail_processing: false,
            on_call: None,
        }
    }
}

/// Start a fake service and a client connected to it
pub fn connect_fake_server(accept_token: bool) -> (ProtocolClient, Calls) {
    FakeService {
        accept_token,
        ..FakeService::default()
    }
    .connect()
}

impl FakeService {
    pub fn connect(self) -> (ProtocolClient, Calls) {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let client = ProtocolClient::from_transport(
            Framed::new(client_io, LinesCodec::new()),
            Some("test-token".to_string()),
        );

        let calls: Calls = Arc::default();
        let recorded = Arc::clone(&calls);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, LinesCodec::new());
            while let Some(Ok(line)) = framed.next().await {
                let command: Value = serde_json::from_str(&line).unwrap();
                let method = command["method"].as_str().unwrap().to_string();
                let params = command["params"].clone();
                recorded.lock().push((method.clone(), params.clone()));
                if let Some(hook) = &self.on_call {
                    hook(&method, &params);
                }

                let reply = match self.respond(&method, &params) {
                    Ok(result) => json!({ "id": command["id"], "result": result }),
                    Err((code, message)) => json!({
                        "id": command["id"],
                        "error": { "code": code, "message": message }
                    }),
                };
                if framed.send(reply.to_string()).await.is_err() {
                    break;
                }
            }
        });

        (client, calls)
    }

    fn respond(&self, method: &str, params: &Value) -> std::result::Result<Value, (i64, String)> {
        match method {
            "Authentication.setAccessToken" if !self.accept_token => {
                Err((AUTHENTICATION_REQUIRED, "Invalid access token".to_string()))
            }
            "Internal.processRecording" if self.fail_processing => {
                Err((500, "processing backend unavailable".to_string()))
            }
            "Internal.beginRecordingUpload" => Ok(json!({
                "recordingId": params["recordingId"],
                "uploadLink": format!("mem://{}/single", params["recordingId"].as_str().unwrap()),
            })),
            "Internal.beginRecordingMultipartUpload" => {
                let id = params["recordingId"].as_str().unwrap();
                let size = params["recordingSize"].as_u64().unwrap();
                let chunk = params["chunkSize"].as_u64().unwrap();
                let parts = size.div_ceil(chunk).max(1);
                let links: Vec<String> =
                    (0..parts).map(|i| format!("mem://{}/part{}", id, i)).collect();
                Ok(json!({
                    "recordingId": id,
                    "uploadId": format!("upload-{}", id),
                    "partLinks": links,
                    "chunkSize": chunk,
                }))
            }
            "Resource.token" => Ok(json!({ "token": "resource-token" })),
            "Resource.exists" => Ok(json!({ "exists": self.resources_exist })),
            "Resource.create" => Ok(json!({ "resource": { "hash": "created" } })),
            "Recording.addSourceMap" => Ok(json!({ "id": "server-map-1" })),
            _ => Ok(json!({})),
        }
    }
}

/// Poll until `method` has been called, or give up after two seconds
pub async fn wait_for_call(calls: &Calls, method: &str) -> bool {
    for _ in 0..200 {
        if !calls_for(calls, method).is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Calls received for `method`, in arrival order
pub fn calls_for(calls: &Calls, method: &str) -> Vec<Value> {
    calls
        .lock()
        .iter()
        .filter(|(m, _)| m == method)
        .map(|(_, p)| p.clone())
        .collect()
}

/// Uploader that keeps bytes in memory and fails URLs containing `fail_on`
#[derive(Default)]
pub struct MemoryUploader {
    pub fail_on: Option<String>,
    /// Every successful PUT takes this long instead of the staggered default;
    /// failing PUTs then wait briefly before failing
    pub stall: Option<Duration>,
    /// Every attempt, in arrival order
    pub puts: Mutex<Vec<(String, usize)>>,
    /// URLs whose PUT ran to completion
    pub completed: Mutex<Vec<String>>,
}

impl MemoryUploader {
    pub fn failing(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    /// Fail `pattern` and keep every other PUT in flight for `stall`
    pub fn failing_with_stalled_siblings(pattern: &str, stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::failing(pattern)
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.puts.lock().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

impl MemoryUploader {
    async fn respond(&self, url: &str) -> Result<PutResponse> {
        if self.fail_on.as_deref().is_some_and(|p| url.contains(p)) {
            if self.stall.is_some() {
                // Let the stalled siblings get their PUTs going first.
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            return Err(UplinkError::Transfer {
                status: Some(500),
                message: "injected failure".to_string(),
            });
        }

        // Lower part numbers finish last.
        let index: u64 = url
            .rsplit("part")
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let delay = self
            .stall
            .unwrap_or_else(|| Duration::from_millis(40u64.saturating_sub(index * 10)));
        tokio::time::sleep(delay).await;

        self.completed.lock().push(url.to_string());
        Ok(PutResponse {
            status: 200,
            etag: Some(format!("etag:{}", url)),
        })
    }
}

#[async_trait]
impl ByteUploader for MemoryUploader {
    async fn put(&self, url: &str, body: Bytes) -> Result<PutResponse> {
        self.puts.lock().push((url.to_string(), body.len()));
        self.respond(url).await
    }

    async fn put_file(&self, url: &str, path: &Path) -> Result<PutResponse> {
        let read = tokio::fs::read(path).await;
        let len = read.as_ref().map(Vec::len).unwrap_or(0);
        self.puts.lock().push((url.to_string(), len));
        read.map_err(|e| UplinkError::io(path, e))?;
        self.respond(url).await
    }
}

/// Fast retries so failure paths finish quickly
pub fn test_options(multipart_min_size: u64, chunk_size: u64) -> UploadOptions {
    test_options_with(multipart_min_size, chunk_size, ProcessingMode::None)
}

pub fn test_options_with(
    multipart_min_size: u64,
    chunk_size: u64,
    processing: ProcessingMode,
) -> UploadOptions {
    UploadOptions {
        multipart_min_size,
        multipart_flag: "cli_multipart_upload".to_string(),
        preferred_chunk_size: chunk_size,
        processing,
        exponential: RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::exponential().with_max_attempts(2).without_jitter()
        },
        linear: RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::linear().with_max_attempts(2).without_jitter()
        },
        part_concurrency: 10,
        source_map_concurrency: 5,
    }
}

fn entry(id: &str, timestamp: i64, event: LogEvent) -> LogEntry {
    LogEntry {
        id: id.to_string(),
        timestamp,
        event,
    }
}

/// Write `size` bytes to `dir/<id>.dat` and log a finished recording for it
pub async fn seed_finished(log: &RecordingLog, dir: &Path, id: &str, size: usize, ts: i64) {
    let path = dir.join(format!("{}.dat", id));
    tokio::fs::write(&path, vec![b'r'; size]).await.unwrap();

    for event in [
        LogEvent::CreateRecording {
            build_id: "linux-chromium-1".to_string(),
            driver_version: None,
        },
        LogEvent::AddMetadata {
            metadata: json!({ "host": "app.test", "title": id, "secret": "x" })
                .as_object()
                .cloned()
                .unwrap(),
        },
        LogEvent::WriteStarted { path },
        LogEvent::WriteFinished,
    ] {
        log.append(&entry(id, ts, event)).await.unwrap();
    }
}

/// Log a crashed recording carrying one crash blob per element of `blobs`
pub async fn seed_crashed(log: &RecordingLog, dir: &Path, id: &str, blobs: &[Value], ts: i64) {
    let path = dir.join(format!("{}.dat", id));
    tokio::fs::write(&path, b"partial").await.unwrap();

    log.append(&entry(
        id,
        ts,
        LogEvent::CreateRecording {
            build_id: "linux-chromium-1".to_string(),
            driver_version: None,
        },
    ))
    .await
    .unwrap();
    log.append(&entry(id, ts, LogEvent::WriteStarted { path }))
        .await
        .unwrap();
    log.append(&entry(id, ts, LogEvent::Crashed)).await.unwrap();
    for blob in blobs {
        log.append(&entry(
            id,
            ts,
            LogEvent::CrashData {
                data: vec![blob.clone()],
            },
        ))
        .await
        .unwrap();
    }
}

/// Attach a source map file (with one original source) to recording `id`
pub async fn seed_source_map(log: &RecordingLog, id: &str, map_id: &str, map: &Path, original: &Path) {
    if !map.exists() {
        tokio::fs::write(map, br#"{"version":3,"mappings":""}"#).await.unwrap();
    }
    if !original.exists() {
        tokio::fs::write(original, b"export const x = 1;").await.unwrap();
    }

    log.append(&entry(
        map_id,
        10,
        LogEvent::SourcemapAdded {
            recording_id: id.to_string(),
            path: map.to_path_buf(),
            base_url: "https://app.test/main.js".to_string(),
            target_content_hash: None,
            target_url_hash: None,
            target_map_url_hash: None,
        },
    ))
    .await
    .unwrap();
    log.append(&entry(
        &format!("{}-src", map_id),
        11,
        LogEvent::OriginalSourceAdded {
            recording_id: id.to_string(),
            parent_id: map_id.to_string(),
            path: original.to_path_buf(),
            parent_offset: 0,
        },
    ))
    .await
    .unwrap();
}
