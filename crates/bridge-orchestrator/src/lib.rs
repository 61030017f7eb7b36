//! The bridge orchestrator: wires the variable catalog, snapshot store,
//! command queue, and every network transport into the single object the
//! simulator host's tick function drives.

pub mod config;
pub mod errors;
mod orchestrator;

pub use config::{BridgeConfig, ConfigError};
pub use errors::OrchestratorError;
pub use orchestrator::{
    BoundAddrs, Diagnostics, DiagnosticsSnapshot, Orchestrator, DEFAULT_OUTBOUND_COMMAND_CAP_BYTES,
};
