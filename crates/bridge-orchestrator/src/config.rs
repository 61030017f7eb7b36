//! Bridge configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/aerofly-bridge/bridge.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//!
//! Every other field has a documented default, so a config file containing
//! only `schema_version = 1` is valid.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Config types (validated, used by the rest of the crate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub schema_version: u32,
    pub shared_memory: SharedMemoryConfig,
    pub tcp: TcpConfig,
    pub websocket: WebSocketConfig,
    pub broadcast: BroadcastConfig,
    pub command_queue: CommandQueueConfig,
    /// Where `VariableCatalog::layout_descriptor()` is written at `on_load`.
    /// `None` skips writing the file (used by tests and by any embedding
    /// host that reads the layout through the ABI instead of the
    /// filesystem).
    pub layout_descriptor_path: Option<PathBuf>,
    /// How long a client session may go without any read/write activity
    /// before it is considered idle and closed.
    pub session_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedMemoryConfig {
    pub os_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpConfig {
    pub data_bind: String,
    pub command_bind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastConfig {
    pub pacing_ms: u64,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandQueueConfig {
    pub capacity: usize,
}

const PACING_MS_FLOOR: u64 = 5;
const PACING_MS_CEILING: u64 = 1000;
const WEBSOCKET_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    shared_memory: Option<RawSharedMemoryConfig>,
    tcp: Option<RawTcpConfig>,
    websocket: Option<RawWebSocketConfig>,
    broadcast: Option<RawBroadcastConfig>,
    command_queue: Option<RawCommandQueueConfig>,
    layout_descriptor_path: Option<String>,
    session_idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSharedMemoryConfig {
    os_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTcpConfig {
    data_bind: Option<String>,
    command_bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWebSocketConfig {
    enabled: Option<bool>,
    bind: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawBroadcastConfig {
    pacing_ms: Option<u64>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawCommandQueueConfig {
    capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/aerofly-bridge/bridge.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<BridgeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let shared_memory = match raw.shared_memory {
        Some(s) => SharedMemoryConfig {
            os_id: s.os_id.unwrap_or_else(|| "/aerofly-bridge-snapshot".to_owned()),
        },
        None => SharedMemoryConfig { os_id: "/aerofly-bridge-snapshot".to_owned() },
    };

    let tcp = match raw.tcp {
        Some(t) => TcpConfig {
            data_bind: t.data_bind.unwrap_or_else(|| "127.0.0.1:12345".to_owned()),
            command_bind: t.command_bind.unwrap_or_else(|| "127.0.0.1:12346".to_owned()),
        },
        None => TcpConfig {
            data_bind: "127.0.0.1:12345".to_owned(),
            command_bind: "127.0.0.1:12346".to_owned(),
        },
    };

    let websocket = match raw.websocket {
        Some(w) => {
            if let Some(port) = w.port {
                if !WEBSOCKET_PORT_RANGE.contains(&port) {
                    return Err(ConfigError::InvalidValue(format!(
                        "websocket.port must be in {}..={}, got {port}",
                        WEBSOCKET_PORT_RANGE.start(),
                        WEBSOCKET_PORT_RANGE.end()
                    )));
                }
            }
            let bind = match (w.bind, w.port) {
                (Some(bind), _) => bind,
                (None, Some(port)) => format!("127.0.0.1:{port}"),
                (None, None) => "127.0.0.1:8765".to_owned(),
            };
            WebSocketConfig { enabled: w.enabled.unwrap_or(true), bind }
        }
        None => WebSocketConfig { enabled: true, bind: "127.0.0.1:8765".to_owned() },
    };

    let broadcast = match raw.broadcast {
        Some(b) => BroadcastConfig {
            pacing_ms: b.pacing_ms.unwrap_or(20),
            max_payload_bytes: b.max_payload_bytes.unwrap_or(64 * 1024),
        },
        None => BroadcastConfig { pacing_ms: 20, max_payload_bytes: 64 * 1024 },
    };
    if broadcast.pacing_ms < PACING_MS_FLOOR || broadcast.pacing_ms > PACING_MS_CEILING {
        return Err(ConfigError::InvalidValue(format!(
            "broadcast.pacing_ms must be in {PACING_MS_FLOOR}..={PACING_MS_CEILING}, got {}",
            broadcast.pacing_ms
        )));
    }

    let command_queue = match raw.command_queue {
        Some(c) => CommandQueueConfig { capacity: c.capacity.unwrap_or(1024) },
        None => CommandQueueConfig { capacity: 1024 },
    };
    if command_queue.capacity == 0 {
        return Err(ConfigError::InvalidValue("command_queue.capacity must be >= 1".to_owned()));
    }

    let layout_descriptor_path = raw.layout_descriptor_path.map(PathBuf::from);
    let session_idle_timeout_secs =
        raw.session_idle_timeout_secs.unwrap_or(DEFAULT_SESSION_IDLE_TIMEOUT_SECS);
    if session_idle_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue("session_idle_timeout_secs must be >= 1".to_owned()));
    }

    Ok(BridgeConfig {
        schema_version,
        shared_memory,
        tcp,
        websocket,
        broadcast,
        command_queue,
        layout_descriptor_path,
        session_idle_timeout_secs,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
