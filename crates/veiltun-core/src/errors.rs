//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// Protocol parsing/validation error.
pub const ERROR_PROTOCOL: &str = "protocol";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Upstream connect error.
pub const ERROR_UPSTREAM: &str = "upstream";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Inbound transport error.
pub const ERROR_TRANSPORT: &str = "transport";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
