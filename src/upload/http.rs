// src/upload/http.rs
//! Byte transfer over HTTP PUT
//!
//! Presigned links from the service are plain `PUT` targets. A non-2xx
//! status is a failure; the `ETag` response header identifies a multipart
//! part when the server asks for one.

use crate::utils::errors::{Result, UplinkError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{CONTENT_LENGTH, ETAG, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

type RequestBody = BoxBody<Bytes, std::io::Error>;

/// Outcome of a successful PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub status: u16,
    pub etag: Option<String>,
}

/// Sends bytes to a presigned URL
#[async_trait]
pub trait ByteUploader: Send + Sync {
    /// PUT an in-memory body (multipart parts)
    async fn put(&self, url: &str, body: Bytes) -> Result<PutResponse>;

    /// PUT the whole file at `path`, streamed from disk.
    ///
    /// A missing file surfaces as [`UplinkError::FileNotFound`].
    async fn put_file(&self, url: &str, path: &Path) -> Result<PutResponse>;
}

/// [`ByteUploader`] backed by hyper's pooled client
pub struct HyperUploader<C> {
    client: Client<C, RequestBody>,
    user_agent: String,
}

impl HyperUploader<HttpConnector> {
    /// Plain-HTTP uploader; use [`HyperUploader::with_connector`] for TLS
    pub fn http(user_agent: &str) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Self::with_connector(connector, user_agent)
    }
}

impl<C> HyperUploader<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    pub fn with_connector(connector: C, user_agent: &str) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            user_agent: user_agent.to_string(),
        }
    }

    async fn send(&self, url: &str, length: u64, body: RequestBody) -> Result<PutResponse> {
        let request = Request::builder()
            .method(Method::PUT)
            .uri(url)
            .header(CONTENT_LENGTH, length)
            .header(USER_AGENT, self.user_agent.as_str())
            .body(body)
            .map_err(|e| UplinkError::Transfer {
                status: None,
                message: format!("Request build error: {}", e),
            })?;

        let response = self.client.request(request).await.map_err(|e| UplinkError::Transfer {
            status: None,
            message: format!("Request failed: {}", e),
        })?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let text = match response.into_body().collect().await {
                Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
                Err(_) => String::new(),
            };
            return Err(UplinkError::Transfer {
                status: Some(status.as_u16()),
                message: if text.is_empty() {
                    status.canonical_reason().unwrap_or("error").to_string()
                } else {
                    text
                },
            });
        }

        debug!("PUT {} bytes: {}", length, status);
        Ok(PutResponse {
            status: status.as_u16(),
            etag,
        })
    }
}

#[async_trait]
impl<C> ByteUploader for HyperUploader<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn put(&self, url: &str, body: Bytes) -> Result<PutResponse> {
        let length = body.len() as u64;
        let body = Full::new(body).map_err(|never| match never {}).boxed();
        self.send(url, length, body).await
    }

    async fn put_file(&self, url: &str, path: &Path) -> Result<PutResponse> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UplinkError::io(path, e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| UplinkError::io(path, e))?
            .len();

        let frames = ReaderStream::new(file).map_ok(Frame::data);
        self.send(url, length, BodyExt::boxed(StreamBody::new(frames))).await
    }
}
