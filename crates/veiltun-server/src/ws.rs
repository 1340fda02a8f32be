//! HTTP front-end: WebSocket upgrade, discovery endpoint, rejects.
//!
//! Every inbound TCP connection starts here. The request head is buffered
//! and inspected once: tunnel clients upgrade to WebSocket on the configured
//! path and become sessions; the discovery path answers with a connection
//! descriptor; everything else gets a bare 404. No protocol details leak on
//! the reject paths.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::WebSocketConfig,
    },
    WebSocketStream,
};
use tracing::{debug, warn};
use veiltun_core::transport::WsFrames;
use veiltun_metrics::record_discovery_request;

use crate::error::ServerError;
use crate::session::TunnelSession;
use crate::state::ServerState;
use crate::util::PrefixedStream;

/// Initial buffer size for reading HTTP headers.
pub const INITIAL_BUFFER_SIZE: usize = 2048;

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// Result of inspecting buffered bytes from a fresh connection.
#[derive(Debug, PartialEq, Eq)]
pub enum HttpInspect {
    /// Need more data to see the full request head.
    NeedMore,
    /// Not HTTP at all; hang up silently.
    NotHttp,
    /// Valid WebSocket upgrade on the tunnel path.
    Upgrade,
    /// GET on the discovery path. Carries the request Host, if any.
    Discovery { host: Option<String> },
    /// Anything else.
    NotFound,
}

/// Inspect a buffered request head.
pub fn inspect(buf: &[u8], state: &ServerState) -> HttpInspect {
    let header_end = match find_header_end(buf) {
        Some(idx) => idx,
        None => return HttpInspect::NeedMore,
    };
    let header_str = match std::str::from_utf8(&buf[..header_end]) {
        Ok(v) => v,
        Err(_) => return HttpInspect::NotHttp,
    };
    let mut lines = header_str.split("\r\n");
    let request_line = match lines.next() {
        Some(v) => v,
        None => return HttpInspect::NotHttp,
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return HttpInspect::NotHttp;
    }
    if method != "GET" {
        return HttpInspect::NotFound;
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;
    let mut host: Option<&str> = None;

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value_trim = value.trim();
            let value_lower = value_trim.to_ascii_lowercase();
            match name.as_str() {
                "upgrade" => {
                    if value_lower.contains("websocket") {
                        upgrade = true;
                    }
                }
                "connection" => {
                    if value_lower.contains("upgrade") {
                        connection_upgrade = true;
                    }
                }
                "sec-websocket-key" => {
                    if !value_trim.is_empty() {
                        ws_key = true;
                    }
                }
                "host" => {
                    host = Some(value_trim);
                }
                _ => {}
            }
        }
    }

    let path_only = path.split('?').next().unwrap_or("");
    if upgrade && connection_upgrade && ws_key {
        if path_only == state.ws_path && host_matches(state, host) {
            return HttpInspect::Upgrade;
        }
        return HttpInspect::NotFound;
    }
    if state.discovery_enabled && path_only == state.discovery_path {
        return HttpInspect::Discovery {
            host: host.map(str::to_string),
        };
    }
    HttpInspect::NotFound
}

/// Handle one accepted connection from head inspection to completion.
pub async fn handle_inbound<S>(
    mut stream: S,
    state: Arc<ServerState>,
    peer: SocketAddr,
    local_port: u16,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        match inspect(&buf, &state) {
            HttpInspect::NeedMore => {
                if buf.len() > state.max_header_bytes {
                    warn!(peer = %peer, bytes = buf.len(), max = state.max_header_bytes, "request head too large");
                    return send_not_found(stream).await;
                }
            }
            HttpInspect::NotHttp => {
                debug!(peer = %peer, "non-http bytes on listener");
                return Ok(());
            }
            HttpInspect::Upgrade => {
                let ws = accept_ws(stream, buf.freeze(), state.ws_max_frame_bytes).await?;
                let channel = WsFrames::new(ws);
                return TunnelSession::new(channel, state, peer).run().await;
            }
            HttpInspect::Discovery { host } => {
                record_discovery_request();
                debug!(peer = %peer, "discovery request");
                return send_discovery(stream, &state, host.as_deref(), local_port).await;
            }
            HttpInspect::NotFound => {
                debug!(peer = %peer, "unmatched http request");
                return send_not_found(stream).await;
            }
        }
    }
}

/// Accept a WebSocket upgrade on the given stream, replaying the buffered
/// head bytes through a `PrefixedStream`.
pub async fn accept_ws<S>(
    stream: S,
    initial: Bytes,
    max_frame_bytes: usize,
) -> Result<WebSocketStream<PrefixedStream<S>>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_frame = if max_frame_bytes == 0 {
        None
    } else {
        Some(max_frame_bytes)
    };
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };
    let prefixed = PrefixedStream::new(initial, stream);
    let ws = accept_hdr_async_with_config(
        prefixed,
        |req: &Request, resp: Response| {
            debug!(path = %req.uri().path(), "websocket upgrade");
            Ok(resp)
        },
        Some(ws_cfg),
    )
    .await
    .map_err(|e| {
        ServerError::Transport(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("websocket handshake failed: {e}"),
        ))
    })?;
    Ok(ws)
}

/// Respond 404 and close. Used for every non-tunnel request so the listener
/// looks like a mostly-empty web server.
pub async fn send_not_found<S>(mut stream: S) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    let response = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    stream.write_all(response).await?;
    Ok(())
}

/// Respond with the connection descriptor for this endpoint.
async fn send_discovery<S>(
    mut stream: S,
    state: &ServerState,
    req_host: Option<&str>,
    local_port: u16,
) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    let body = discovery_body(state, req_host, local_port);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Build the descriptor a client needs to reach this endpoint.
fn discovery_body(state: &ServerState, req_host: Option<&str>, local_port: u16) -> String {
    let authority = match state.advertise_host.as_deref().or(req_host) {
        Some(host) if host.contains(':') => host.to_string(),
        Some(host) => format!("{host}:{local_port}"),
        None => format!("127.0.0.1:{local_port}"),
    };
    format!(
        "veil://{}@{}?path={}\n",
        state.client_id,
        authority,
        state.ws_path.replace('/', "%2F")
    )
}

fn host_matches(state: &ServerState, host: Option<&str>) -> bool {
    let expected = match state.ws_host.as_deref() {
        Some(v) => v,
        None => return true,
    };
    let host = match host {
        Some(v) => v,
        None => return false,
    };
    let host_only = host.split(':').next().unwrap_or("");
    host_only.eq_ignore_ascii_case(expected)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}
