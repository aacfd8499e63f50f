use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrawbridgeError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Template missing: {}", .0.display())]
    TemplateMissing(PathBuf),

    #[error("Persist failed: {0}")]
    PersistFailed(String),

    #[error("Malformed scene: {0}")]
    MalformedScene(String),

    #[error("Bridge not ready: {0}")]
    BridgeNotReady(String),

    #[error("An export is already in progress")]
    ExportInProgress,

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Protected folder: {0}")]
    ProtectedFolder(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DrawbridgeError>;
