use thiserror::Error;

use crate::config::ConfigError;
use bridge_core::{CatalogError, SnapshotError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("snapshot store error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
    #[error("failed to start bridge runtime: {0}")]
    Runtime(std::io::Error),
}
