// src/protocol/api.rs
//! Typed calls used by the upload pipeline
//!
//! Every call waits for authentication before sending, so commands are never
//! issued on an unauthenticated connection.

use crate::protocol::client::ProtocolClient;
use crate::protocol::message::methods;
use crate::utils::errors::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Ticket for a single-shot upload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub recording_id: String,
    pub upload_link: String,
}

/// Ticket for a multipart upload: one presigned link per part
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartTicket {
    pub recording_id: String,
    pub upload_id: String,
    pub part_links: Vec<String>,
    pub chunk_size: u64,
}

/// Content-addressed handle for a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub hash: String,
}

#[derive(Deserialize)]
struct TokenResult {
    token: String,
}

#[derive(Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Deserialize)]
struct CreateResult {
    resource: ResourceRef,
}

#[derive(Deserialize)]
struct AddSourceMapResult {
    id: String,
}

/// Source map registration request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapRequest {
    pub recording_id: String,
    pub resource: ResourceRef,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_content_hash: Option<String>,
    #[serde(rename = "targetURLHash", skip_serializing_if = "Option::is_none")]
    pub target_url_hash: Option<String>,
    #[serde(rename = "targetMapURLHash", skip_serializing_if = "Option::is_none")]
    pub target_map_url_hash: Option<String>,
}

/// Authenticated wrapper around [`ProtocolClient`]
#[derive(Clone)]
pub struct UplinkApi {
    client: ProtocolClient,
}

impl UplinkApi {
    pub fn new(client: ProtocolClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        self.client.wait_until_authenticated().await?;
        let result = self.client.call(method, params, None).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_unit(&self, method: &str, params: Value) -> Result<()> {
        self.client.wait_until_authenticated().await?;
        self.client.call(method, params, None).await.map(|_| ())
    }

    pub async fn begin_recording_upload(
        &self,
        recording_id: &str,
        build_id: &str,
        size: u64,
    ) -> Result<UploadTicket> {
        self.call(
            methods::BEGIN_RECORDING_UPLOAD,
            json!({ "recordingId": recording_id, "buildId": build_id, "recordingSize": size }),
        )
        .await
    }

    pub async fn end_recording_upload(&self, recording_id: &str) -> Result<()> {
        self.call_unit(
            methods::END_RECORDING_UPLOAD,
            json!({ "recordingId": recording_id }),
        )
        .await
    }

    pub async fn begin_recording_multipart_upload(
        &self,
        recording_id: &str,
        build_id: &str,
        size: u64,
        preferred_chunk_size: u64,
    ) -> Result<MultipartTicket> {
        self.call(
            methods::BEGIN_RECORDING_MULTIPART_UPLOAD,
            json!({
                "recordingId": recording_id,
                "buildId": build_id,
                "recordingSize": size,
                "chunkSize": preferred_chunk_size,
            }),
        )
        .await
    }

    /// Finish a multipart upload; `etags` must be in part order
    pub async fn end_recording_multipart_upload(
        &self,
        recording_id: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<()> {
        self.call_unit(
            methods::END_RECORDING_MULTIPART_UPLOAD,
            json!({ "recordingId": recording_id, "uploadId": upload_id, "partIds": etags }),
        )
        .await
    }

    pub async fn set_recording_metadata(
        &self,
        recording_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<()> {
        let mut recording_data = metadata.clone();
        recording_data.insert("id".to_string(), json!(recording_id));
        self.call_unit(
            methods::SET_RECORDING_METADATA,
            json!({ "metadata": { "recordingData": recording_data } }),
        )
        .await
    }

    pub async fn process_recording(&self, recording_id: &str) -> Result<()> {
        self.call_unit(
            methods::PROCESS_RECORDING,
            json!({ "recordingId": recording_id }),
        )
        .await
    }

    /// Submit one crash diagnostic blob
    pub async fn report_crash(&self, data: &Value) -> Result<()> {
        self.call_unit(methods::REPORT_CRASH, json!({ "data": data }))
            .await
    }

    pub async fn get_resource_token(&self, resource: &ResourceRef) -> Result<String> {
        let result: TokenResult = self
            .call(methods::RESOURCE_TOKEN, json!({ "resource": resource }))
            .await?;
        Ok(result.token)
    }

    pub async fn resource_exists(&self, resource: &ResourceRef, token: &str) -> Result<bool> {
        let result: ExistsResult = self
            .call(
                methods::RESOURCE_EXISTS,
                json!({ "resource": resource, "token": token }),
            )
            .await?;
        Ok(result.exists)
    }

    pub async fn create_resource(&self, content: &str) -> Result<ResourceRef> {
        let result: CreateResult = self
            .call(methods::RESOURCE_CREATE, json!({ "content": content }))
            .await?;
        Ok(result.resource)
    }

    /// Attach a source map; returns the server-side id used as parent for
    /// its original sources
    pub async fn add_source_map(&self, request: &SourceMapRequest) -> Result<String> {
        let result: AddSourceMapResult = self
            .call(methods::ADD_SOURCE_MAP, serde_json::to_value(request)?)
            .await?;
        Ok(result.id)
    }

    pub async fn add_original_source(
        &self,
        recording_id: &str,
        resource: &ResourceRef,
        parent_id: &str,
        parent_offset: u64,
    ) -> Result<()> {
        self.call_unit(
            methods::ADD_ORIGINAL_SOURCE,
            json!({
                "recordingId": recording_id,
                "resource": resource,
                "parentId": parent_id,
                "parentOffset": parent_offset,
            }),
        )
        .await
    }
}
