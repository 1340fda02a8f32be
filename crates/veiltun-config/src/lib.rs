//! Configuration loading and CLI definitions.
//!
//! Configuration is an explicit, immutable value handed to the server at
//! startup; nothing reads ambient global state.

use std::{fs, path::Path};

use clap::Parser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veiltun_core::defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub listen: String,
    /// Shared client identifier. Advertised by the discovery endpoint;
    /// a handshake carrying a different id is logged but not rejected.
    pub client_id: Uuid,
    /// Fixed destination host override. When set, every tunnel connects
    /// here instead of the host named in the handshake (the handshake port
    /// still applies).
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Maximum concurrent connections (None = unlimited).
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Resource limits configuration.
    #[serde(default)]
    pub resource_limits: Option<ResourceLimitsConfig>,
}

/// Configuration for resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    /// Buffer size for upstream reads (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// TCP socket send buffer size (SO_SNDBUF). If 0, uses OS default.
    #[serde(default)]
    pub tcp_send_buffer: usize,
    /// TCP socket receive buffer size (SO_RCVBUF). If 0, uses OS default.
    #[serde(default)]
    pub tcp_recv_buffer: usize,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Upgrade path tunnel clients must request.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Expected Host header; any host accepted when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ws_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            host: None,
            max_frame_bytes: default_ws_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    /// Path serving the connection descriptor.
    #[serde(default = "default_discovery_path")]
    pub path: String,
    /// Host advertised in the descriptor; falls back to the request Host.
    #[serde(default)]
    pub advertise_host: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            path: default_discovery_path(),
            advertise_host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    pub listen: Option<String>,
    /// Override the shared client identifier
    #[arg(long)]
    pub client_id: Option<Uuid>,
    /// Override the fixed destination host
    #[arg(long)]
    pub destination: Option<String>,
    /// Override upstream connect timeout (seconds)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,
    /// Override relay idle timeout (seconds)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
    /// Override maximum HTTP request head bytes
    #[arg(long)]
    pub max_header_bytes: Option<usize>,
    /// Override maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override WebSocket upgrade path
    #[arg(long)]
    pub ws_path: Option<String>,
    /// Override expected Host header
    #[arg(long)]
    pub ws_host: Option<String>,
    /// Override WebSocket max frame bytes
    #[arg(long)]
    pub ws_max_frame_bytes: Option<usize>,
    /// Enable/disable the discovery endpoint
    #[arg(long)]
    pub discovery_enabled: Option<bool>,
    /// Override discovery endpoint path
    #[arg(long)]
    pub discovery_path: Option<String>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Buffer size for upstream reads (bytes)
    #[arg(long)]
    pub relay_buffer_size: Option<usize>,
    /// TCP socket send buffer size (SO_SNDBUF, 0 = OS default)
    #[arg(long)]
    pub tcp_send_buffer: Option<usize>,
    /// TCP socket receive buffer size (SO_RCVBUF, 0 = OS default)
    #[arg(long)]
    pub tcp_recv_buffer: Option<usize>,
    /// TCP listener backlog size
    #[arg(long)]
    pub connection_backlog: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" => Ok(serde_json::from_str(&data)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = overrides.client_id {
        config.server.client_id = v;
    }
    if let Some(v) = &overrides.destination {
        config.server.destination = Some(v.clone());
    }
    if let Some(v) = overrides.connect_timeout_secs {
        config.server.connect_timeout_secs = v;
    }
    if let Some(v) = overrides.idle_timeout_secs {
        config.server.idle_timeout_secs = v;
    }
    if let Some(v) = overrides.max_header_bytes {
        config.server.max_header_bytes = v;
    }
    if let Some(v) = overrides.max_connections {
        config.server.max_connections = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = &overrides.ws_path {
        config.websocket.path = v.clone();
    }
    if let Some(v) = &overrides.ws_host {
        config.websocket.host = Some(v.clone());
    }
    if let Some(v) = overrides.ws_max_frame_bytes {
        config.websocket.max_frame_bytes = v;
    }
    if let Some(v) = overrides.discovery_enabled {
        config.discovery.enabled = v;
    }
    if let Some(v) = &overrides.discovery_path {
        config.discovery.path = v.clone();
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if overrides.relay_buffer_size.is_some()
        || overrides.tcp_send_buffer.is_some()
        || overrides.tcp_recv_buffer.is_some()
        || overrides.connection_backlog.is_some()
    {
        let rl = config
            .server
            .resource_limits
            .get_or_insert_with(|| ResourceLimitsConfig {
                relay_buffer_size: default_relay_buffer_size(),
                tcp_send_buffer: 0,
                tcp_recv_buffer: 0,
                connection_backlog: default_connection_backlog(),
            });
        if let Some(v) = overrides.relay_buffer_size {
            rl.relay_buffer_size = v;
        }
        if let Some(v) = overrides.tcp_send_buffer {
            rl.tcp_send_buffer = v;
        }
        if let Some(v) = overrides.tcp_recv_buffer {
            rl.tcp_recv_buffer = v;
        }
        if let Some(v) = overrides.connection_backlog {
            rl.connection_backlog = v;
        }
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.connect_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.idle_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.max_header_bytes < 256 {
        return Err(ConfigError::Validation(
            "server.max_header_bytes too small (min 256)".into(),
        ));
    }
    if let Some(dest) = &config.server.destination {
        if dest.trim().is_empty() || dest.contains(char::is_whitespace) {
            return Err(ConfigError::Validation(
                "server.destination must be a bare host".into(),
            ));
        }
    }
    if !config.websocket.path.starts_with('/') {
        return Err(ConfigError::Validation(
            "websocket.path must start with '/'".into(),
        ));
    }
    if config.websocket.max_frame_bytes == 0 {
        return Err(ConfigError::Validation(
            "websocket.max_frame_bytes must be > 0".into(),
        ));
    }
    if config.discovery.enabled {
        if !config.discovery.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "discovery.path must start with '/'".into(),
            ));
        }
        if config.discovery.path == config.websocket.path {
            return Err(ConfigError::Validation(
                "discovery.path must differ from websocket.path".into(),
            ));
        }
    }
    if let Some(ref rl) = config.server.resource_limits {
        if rl.relay_buffer_size < 1024 {
            return Err(ConfigError::Validation(
                "resource_limits.relay_buffer_size must be >= 1024".into(),
            ));
        }
        if rl.relay_buffer_size > 1024 * 1024 {
            return Err(ConfigError::Validation(
                "resource_limits.relay_buffer_size must be <= 1MB".into(),
            ));
        }
        if rl.connection_backlog == 0 {
            return Err(ConfigError::Validation(
                "resource_limits.connection_backlog must be > 0".into(),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Default Value Functions (for serde)
// ============================================================================

fn default_connect_timeout_secs() -> u64 {
    defaults::DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_idle_timeout_secs() -> u64 {
    defaults::DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_max_header_bytes() -> usize {
    defaults::DEFAULT_MAX_HEADER_BYTES
}
fn default_relay_buffer_size() -> usize {
    defaults::DEFAULT_RELAY_BUFFER_SIZE
}
fn default_connection_backlog() -> u32 {
    defaults::DEFAULT_CONNECTION_BACKLOG
}
fn default_ws_path() -> String {
    defaults::DEFAULT_WS_PATH.to_string()
}
fn default_ws_max_frame_bytes() -> usize {
    defaults::DEFAULT_WS_MAX_FRAME_BYTES
}
fn default_discovery_enabled() -> bool {
    defaults::DEFAULT_DISCOVERY_ENABLED
}
fn default_discovery_path() -> String {
    defaults::DEFAULT_DISCOVERY_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
listen = "127.0.0.1:8080"
client_id = "d342d11e-d424-4f6a-b093-93956c17dc4b"
"#;

    fn minimal_config() -> Config {
        toml::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn minimal_toml_gets_defaults() {
        let config = minimal_config();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(
            config.server.connect_timeout_secs,
            defaults::DEFAULT_CONNECT_TIMEOUT_SECS
        );
        assert_eq!(config.websocket.path, defaults::DEFAULT_WS_PATH);
        assert!(!config.discovery.enabled);
        assert!(config.server.destination.is_none());
        assert!(config.metrics.listen.is_none());
        validate_config(&config).unwrap();
    }

    #[test]
    fn full_toml_parses() {
        let config: Config = toml::from_str(
            r#"
[server]
listen = "0.0.0.0:443"
client_id = "d342d11e-d424-4f6a-b093-93956c17dc4b"
destination = "10.0.0.9"
connect_timeout_secs = 5
idle_timeout_secs = 120
max_connections = 512

[server.resource_limits]
relay_buffer_size = 65536
connection_backlog = 128

[websocket]
path = "/tunnel"
host = "cdn.example.com"

[discovery]
enabled = true
path = "/sub"
advertise_host = "cdn.example.com"

[metrics]
listen = "127.0.0.1:9100"

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.server.destination.as_deref(), Some("10.0.0.9"));
        assert_eq!(config.websocket.path, "/tunnel");
        assert!(config.discovery.enabled);
        assert_eq!(
            config.server.resource_limits.as_ref().unwrap().relay_buffer_size,
            65536
        );
        validate_config(&config).unwrap();
    }

    #[test]
    fn overrides_apply() {
        let mut config = minimal_config();
        let overrides = CliOverrides {
            listen: Some("0.0.0.0:9000".into()),
            ws_path: Some("/t".into()),
            max_connections: Some(0),
            relay_buffer_size: Some(4096),
            ..CliOverrides::default()
        };
        apply_overrides(&mut config, &overrides);
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.websocket.path, "/t");
        assert!(config.server.max_connections.is_none());
        assert_eq!(
            config.server.resource_limits.unwrap().relay_buffer_size,
            4096
        );
    }

    #[test]
    fn validation_rejects_bad_paths() {
        let mut config = minimal_config();
        config.websocket.path = "tunnel".into();
        assert!(validate_config(&config).is_err());

        let mut config = minimal_config();
        config.discovery.enabled = true;
        config.discovery.path = config.websocket.path.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validation_rejects_zero_timeouts() {
        let mut config = minimal_config();
        config.server.idle_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = minimal_config();
        config.server.connect_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validation_rejects_bad_destination() {
        let mut config = minimal_config();
        config.server.destination = Some("bad host".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn json_and_yaml_accepted() {
        let json = serde_json::to_string(&minimal_config()).unwrap();
        let from_json: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(from_json.server.listen, "127.0.0.1:8080");

        let yaml = serde_yaml::to_string(&minimal_config()).unwrap();
        let from_yaml: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(from_yaml.server.client_id, from_json.server.client_id);
    }
}
