// src/telemetry/mod.rs
//! Collaborator interfaces and the authentication-gated task queue
//!
//! The upload pipeline only needs to hand values to these services; it never
//! inspects what they do with them.

pub mod client;
pub mod collaborators;
pub mod task_queue;

pub use client::TelemetryClient;
pub use collaborators::{
    FeatureFlags, FixedIdentity, Identity, IdentityResolver, PackageInfo, StaticFeatureFlags,
    TelemetrySink, TracingSink,
};
pub use task_queue::{AuthenticatedTaskQueue, TaskStatus, FLUSH_TIMEOUT};
