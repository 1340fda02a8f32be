//! Upstream connection establishment.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::debug;
use veiltun_metrics::{record_upstream_connect, record_upstream_connect_failure};
use veiltun_proto::{AddressSpec, ConnectionRequest};

use crate::error::ServerError;
use crate::state::ServerState;
use crate::util::connect_with_buffers;

/// Open the outbound TCP connection for a decoded request.
///
/// The configured destination override wins over the decoded address; the
/// decoded port always applies. Never retried: by the time this runs the
/// destination was committed by the single handshake decode.
pub async fn connect(
    request: &ConnectionRequest,
    state: &ServerState,
) -> Result<TcpStream, ServerError> {
    let start = Instant::now();
    let attempt = async {
        let target = resolve_target(request, state).await?;
        debug!(target = %target, "connecting upstream");
        connect_with_buffers(target, state.tcp_send_buffer, state.tcp_recv_buffer)
            .await
            .map_err(ServerError::UpstreamConnect)
    };

    match timeout(state.connect_timeout, attempt).await {
        Ok(Ok(stream)) => {
            record_upstream_connect(start.elapsed().as_secs_f64());
            Ok(stream)
        }
        Ok(Err(err)) => {
            record_upstream_connect_failure();
            Err(err)
        }
        Err(_) => {
            record_upstream_connect_failure();
            Err(ServerError::UpstreamTimeout)
        }
    }
}

async fn resolve_target(
    request: &ConnectionRequest,
    state: &ServerState,
) -> Result<SocketAddr, ServerError> {
    if let Some(dest) = &state.destination {
        return resolve_host(dest, request.port).await;
    }
    match &request.address {
        AddressSpec::Ipv4(octets) => Ok(SocketAddr::from((*octets, request.port))),
        AddressSpec::Ipv6(groups) => {
            let ip = Ipv6Addr::new(
                groups[0], groups[1], groups[2], groups[3], groups[4], groups[5], groups[6],
                groups[7],
            );
            Ok(SocketAddr::from((ip, request.port)))
        }
        AddressSpec::Domain(name) => resolve_host(name, request.port).await,
    }
}

async fn resolve_host(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    // The override (or a decoded name) may itself be an IP literal.
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|_| ServerError::Resolve(host.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| ServerError::Resolve(host.to_string()))
}
