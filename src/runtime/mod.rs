// src/runtime/mod.rs
//! Async primitives shared by the upload pipeline
//!
//! - **Deferred**: settle-once completion handle with typed context data
//! - **Timeout**: race a future against a deadline
//! - **Retry**: exponential and linear backoff around fallible calls
//! - **Work Queue**: bounded concurrency with per-caller groups
//!
//! # Architecture
//!
//! ```text
//!   upload_recordings()
//!          │
//!   ┌──────┴───────────────┐
//!   │ part pool (10)       │ ← shared by every recording in the batch
//!   │ source-map pool (5)  │ ← forked per recording
//!   └──────────────────────┘
//!          │
//!   retry_with_backoff() around each PUT / RPC call
//! ```

pub mod deferred;
pub mod retry;
pub mod timeout;
pub mod work_queue;

// Re-export commonly used types
pub use deferred::{Deferred, DeferredStatus};
pub use retry::{retry_with_backoff, Backoff, RetryPolicy};
pub use timeout::{race_timeout, with_timeout};
pub use work_queue::{WorkGroup, WorkQueue};
