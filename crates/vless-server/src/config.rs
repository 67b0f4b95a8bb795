//! Configuration loading and CLI overrides.

use std::collections::HashMap;
use std::{fs, path::Path};

use clap::Parser;
use serde::{Deserialize, Serialize};
use vless_core::defaults;
use vless_proto::Credential;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:10000".
    pub listen: String,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Maximum concurrent connections (None = unlimited)
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Buffer size for the relay (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Upstream socket send buffer size (SO_SNDBUF). If 0, uses OS default.
    #[serde(default)]
    pub tcp_send_buffer: usize,
    /// Upstream socket receive buffer size (SO_RCVBUF). If 0, uses OS default.
    #[serde(default)]
    pub tcp_recv_buffer: usize,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Tunnel path marker; upgrade requests on any other path are rejected.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Optional expected Host header; unset accepts any host.
    #[serde(default)]
    pub host: Option<String>,
    /// Max WebSocket frame/message size (0 = unlimited).
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
pub struct AuthConfig {
    /// Client credential as a UUID string, with or without dashes.
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Output format (json, pretty, compact). Default: pretty.
    pub format: Option<String>,
    /// Output target (stdout, stderr). Default: stderr.
    pub output: Option<String>,
    /// Per-module log level overrides.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:10000
    #[arg(long)]
    pub listen: Option<String>,
    /// Override the client credential UUID
    #[arg(long)]
    pub uuid: Option<String>,
    /// Override relay idle timeout (seconds)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
    /// Override handshake-read timeout (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
    /// Override maximum upgrade header bytes
    #[arg(long)]
    pub max_header_bytes: Option<usize>,
    /// Override maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override relay buffer size (bytes)
    #[arg(long)]
    pub relay_buffer_size: Option<usize>,
    /// Upstream socket send buffer size (SO_SNDBUF, 0 = OS default)
    #[arg(long)]
    pub tcp_send_buffer: Option<usize>,
    /// Upstream socket receive buffer size (SO_RCVBUF, 0 = OS default)
    #[arg(long)]
    pub tcp_recv_buffer: Option<usize>,
    /// Override TCP listener backlog size
    #[arg(long)]
    pub connection_backlog: Option<u32>,
    /// Override WebSocket tunnel path
    #[arg(long)]
    pub ws_path: Option<String>,
    /// Override expected WebSocket Host header
    #[arg(long)]
    pub ws_host: Option<String>,
    /// Override max WebSocket frame bytes (0 = unlimited)
    #[arg(long)]
    pub ws_max_frame_bytes: Option<usize>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
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
    if let Some(v) = &overrides.uuid {
        config.auth.uuid = v.clone();
    }
    if let Some(v) = overrides.idle_timeout_secs {
        config.server.idle_timeout_secs = v;
    }
    if let Some(v) = overrides.handshake_timeout_secs {
        config.server.handshake_timeout_secs = v;
    }
    if let Some(v) = overrides.max_header_bytes {
        config.server.max_header_bytes = v;
    }
    if let Some(v) = overrides.max_connections {
        config.server.max_connections = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = overrides.relay_buffer_size {
        config.server.relay_buffer_size = v;
    }
    if let Some(v) = overrides.tcp_send_buffer {
        config.server.tcp_send_buffer = v;
    }
    if let Some(v) = overrides.tcp_recv_buffer {
        config.server.tcp_recv_buffer = v;
    }
    if let Some(v) = overrides.connection_backlog {
        config.server.connection_backlog = v;
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
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if Credential::from_uuid(&config.auth.uuid).is_err() {
        return Err(ConfigError::Validation(
            "auth.uuid is not a valid UUID".into(),
        ));
    }
    if config.server.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.idle_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.max_header_bytes < 256 {
        return Err(ConfigError::Validation(
            "server.max_header_bytes too small (min 256)".into(),
        ));
    }
    if config.server.relay_buffer_size < 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be >= 1024".into(),
        ));
    }
    if config.server.relay_buffer_size > 1024 * 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be <= 1MB".into(),
        ));
    }
    if config.server.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "server.connection_backlog must be > 0".into(),
        ));
    }
    if !config.websocket.path.starts_with('/') {
        return Err(ConfigError::Validation(
            "websocket.path must start with '/'".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Default Value Functions (for serde)
// ============================================================================

/// Generate default value functions that forward to vless_core::defaults.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_idle_timeout_secs      => DEFAULT_IDLE_TIMEOUT_SECS: u64,
    default_handshake_timeout_secs => DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64,
    default_max_header_bytes       => DEFAULT_MAX_HEADER_BYTES: usize,
    default_relay_buffer_size      => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_connection_backlog     => DEFAULT_CONNECTION_BACKLOG: u32,
    default_ws_max_frame_bytes     => DEFAULT_WS_MAX_FRAME_BYTES: usize,
}

default_string_fns! {
    default_ws_path => DEFAULT_WS_PATH,
}
