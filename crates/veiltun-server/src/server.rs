//! Main server loop and connection handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veiltun_config::Config;
use veiltun_core::defaults;
use veiltun_metrics::{
    record_connection_accepted, record_connection_closed, record_connection_rejected,
    record_error,
};

use crate::error::ServerError;
use crate::state::ServerState;
use crate::util::{create_listener, ConnectionGuard, ConnectionTracker};
use crate::ws::handle_inbound;

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration =
    Duration::from_secs(defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS);

/// A bound server, ready to accept.
///
/// Splitting bind from run lets embedders (and tests) learn the actual
/// listen address before the accept loop starts.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    conn_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the listener and freeze configuration into shared state.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let listen: SocketAddr = config
            .server
            .listen
            .parse()
            .map_err(|_| ServerError::Config("invalid listen address".into()))?;

        let backlog = config
            .server
            .resource_limits
            .as_ref()
            .map(|rl| rl.connection_backlog)
            .unwrap_or(defaults::DEFAULT_CONNECTION_BACKLOG);

        let state = Arc::new(ServerState::from_config(config));
        let listener = create_listener(listen, backlog)?;

        let conn_limit = config.server.max_connections.map(|n| {
            info!("max_connections set to {}", n);
            Arc::new(Semaphore::new(n))
        });

        Ok(Self {
            listener,
            state,
            conn_limit,
        })
    }

    /// The address the listener actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the token fires, then drain active sessions.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let local_addr = self.local_addr()?;
        let local_port = local_addr.port();
        let tracker = ConnectionTracker::new();
        info!(address = %local_addr, "listening");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                result = self.listener.accept() => {
                    let (tcp, peer) = result?;

                    let permit: Option<OwnedSemaphorePermit> = match &self.conn_limit {
                        Some(sem) => match sem.clone().try_acquire_owned() {
                            Ok(p) => Some(p),
                            Err(_) => {
                                debug!(peer = %peer, reason = "max_connections", "connection rejected");
                                record_connection_rejected("max_connections");
                                drop(tcp);
                                continue;
                            }
                        },
                        None => None,
                    };

                    debug!(peer = %peer, "new connection");
                    let _ = tcp.set_nodelay(true);

                    let state = self.state.clone();
                    let guard = ConnectionGuard::new(tracker.clone());

                    tokio::spawn(async move {
                        let _guard = guard;
                        let _permit = permit;
                        record_connection_accepted();
                        let start = Instant::now();

                        let result = handle_inbound(tcp, state, peer, local_port).await;

                        let duration_secs = start.elapsed().as_secs_f64();
                        record_connection_closed(duration_secs);

                        if let Err(ref err) = result {
                            record_error(err.error_type());
                            debug!(peer = %peer, duration_secs, error = %err, "connection closed with error");
                        } else {
                            debug!(peer = %peer, duration_secs, "connection closed");
                        }
                    });
                }
            }
        }

        // Graceful drain: wait for active connections.
        let active = tracker.count();
        if active > 0 {
            info!("waiting for {} active connections to drain", active);
            if tracker.wait_for_zero(DEFAULT_SHUTDOWN_TIMEOUT).await {
                info!("all connections drained");
            } else {
                warn!(
                    "shutdown timeout, {} connections still active",
                    tracker.count()
                );
            }
        }

        info!("server stopped");
        Ok(())
    }
}

/// Bind and run in one step, with a cancellation token for graceful
/// shutdown.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    Server::bind(&config)?.run(shutdown).await
}
