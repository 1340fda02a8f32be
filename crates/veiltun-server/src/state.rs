//! Per-process state shared read-only by all sessions.

use std::time::Duration;

use uuid::Uuid;
use veiltun_config::Config;
use veiltun_core::defaults;

/// Immutable configuration snapshot handed to every session. Sessions share
/// nothing mutable; this is the only cross-session structure.
pub struct ServerState {
    pub client_id: Uuid,
    pub destination: Option<String>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_header_bytes: usize,
    pub relay_buffer_size: usize,
    pub tcp_send_buffer: usize,
    pub tcp_recv_buffer: usize,
    pub ws_path: String,
    pub ws_host: Option<String>,
    pub ws_max_frame_bytes: usize,
    pub discovery_enabled: bool,
    pub discovery_path: String,
    pub advertise_host: Option<String>,
}

impl ServerState {
    pub fn from_config(config: &Config) -> Self {
        let (relay_buffer_size, tcp_send_buffer, tcp_recv_buffer) =
            match &config.server.resource_limits {
                Some(rl) => (rl.relay_buffer_size, rl.tcp_send_buffer, rl.tcp_recv_buffer),
                None => (
                    defaults::DEFAULT_RELAY_BUFFER_SIZE,
                    defaults::DEFAULT_TCP_SEND_BUFFER,
                    defaults::DEFAULT_TCP_RECV_BUFFER,
                ),
            };
        Self {
            client_id: config.server.client_id,
            destination: config.server.destination.clone(),
            connect_timeout: Duration::from_secs(config.server.connect_timeout_secs),
            idle_timeout: Duration::from_secs(config.server.idle_timeout_secs),
            max_header_bytes: config.server.max_header_bytes,
            relay_buffer_size,
            tcp_send_buffer,
            tcp_recv_buffer,
            ws_path: config.websocket.path.clone(),
            ws_host: config.websocket.host.clone(),
            ws_max_frame_bytes: config.websocket.max_frame_bytes,
            discovery_enabled: config.discovery.enabled,
            discovery_path: config.discovery.path.clone(),
            advertise_host: config.discovery.advertise_host.clone(),
        }
    }
}
