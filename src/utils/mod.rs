// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{ProcessingMode, UplinkConfig};
pub use errors::{Result, UplinkError};
