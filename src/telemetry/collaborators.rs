// src/telemetry/collaborators.rs
//! Interfaces to services the pipeline consumes but does not implement

use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// Who the access token belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    /// `"user"` or `"workspace"`
    #[serde(rename = "type")]
    pub kind: String,
}

/// Name and version of the running package, attached to telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

impl PackageInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Resolves the identity behind an access token
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Result<Identity>;
}

/// Identity known up front
pub struct FixedIdentity(pub Identity);

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn resolve(&self) -> Result<Identity> {
        Ok(self.0.clone())
    }
}

/// Boolean feature switches
pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, name: &str, default: bool) -> bool;
}

/// Flags from a fixed map; unknown flags fall back to the caller's default
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    flags: HashMap<String, bool>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, enabled: bool) -> Self {
        self.flags.insert(name.to_string(), enabled);
        self
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn is_enabled(&self, name: &str, default: bool) -> bool {
        self.flags.get(name).copied().unwrap_or(default)
    }
}

/// Fire-and-forget destination for telemetry events
pub trait TelemetrySink: Send + Sync {
    fn send(&self, event: &str, properties: &Value);
}

/// Writes telemetry events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn send(&self, event: &str, properties: &Value) {
        info!(target: "telemetry", event, %properties, "Telemetry event");
    }
}
