//! veiltun server library.
//!
//! This module exposes the server implementation for use by integration
//! tests and potential embedding scenarios.

mod error;
mod pump;
mod server;
mod session;
mod state;
mod upstream;
mod util;
mod ws;

pub mod cli;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::ServerError;
pub use server::{run_with_shutdown, Server, DEFAULT_SHUTDOWN_TIMEOUT};
pub use session::{SessionState, TunnelSession};
pub use state::ServerState;
pub use tokio_util::sync::CancellationToken;
