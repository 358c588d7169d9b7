// src/protocol/mod.rs
//! Connection to the ingestion service
//!
//! - **Message**: wire shapes, method names and `ProtocolError`
//! - **Transport**: newline-delimited JSON over TCP
//! - **Client**: correlation of commands and responses on one connection
//! - **Api**: typed, authentication-gated calls
//!
//! # Architecture
//!
//! ```text
//! UplinkApi ──► ProtocolClient::send_command ──► outbound queue ──► writer task ──► socket
//!                      │ (id → Deferred)                                             │
//!                      └──────────── settled by reader task ◄────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod message;
pub mod transport;

pub use api::{MultipartTicket, ResourceRef, SourceMapRequest, UploadTicket, UplinkApi};
pub use client::{CommandContext, PendingCommand, ProtocolClient};
pub use message::{ProtocolError, AUTHENTICATION_REQUIRED};
