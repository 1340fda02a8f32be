//! Core constants and transport adapters shared across veiltun crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for metrics/logging
//! - The WebSocket frame-channel adapter used by the server

pub mod defaults;
pub mod errors;
pub mod transport;

pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "veiltun";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
