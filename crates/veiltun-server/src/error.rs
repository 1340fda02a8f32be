//! Server error types.

use veiltun_metrics::{
    ERROR_CONFIG, ERROR_IO, ERROR_PROTOCOL, ERROR_RESOLVE, ERROR_TIMEOUT, ERROR_TRANSPORT,
    ERROR_UPSTREAM,
};
use veiltun_proto::DecodeError;

/// Server error type. Every variant is terminal for the session it occurs
/// in; the client only ever observes a closed connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("handshake: {0}")]
    Handshake(#[from] DecodeError),
    #[error("upstream connect: {0}")]
    UpstreamConnect(#[source] std::io::Error),
    #[error("upstream connect timed out")]
    UpstreamTimeout,
    #[error("resolve failed: {0}")]
    Resolve(String),
    #[error("inbound transport: {0}")]
    Transport(#[source] std::io::Error),
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Io(_) => ERROR_IO,
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::Handshake(_) => ERROR_PROTOCOL,
            ServerError::UpstreamConnect(_) => ERROR_UPSTREAM,
            ServerError::UpstreamTimeout => ERROR_TIMEOUT,
            ServerError::Resolve(_) => ERROR_RESOLVE,
            ServerError::Transport(_) => ERROR_TRANSPORT,
        }
    }
}
