use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or writing the session snapshot or the history log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported session version {found} in {path}")]
    Version { path: PathBuf, found: u32 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json { path: path.into(), source }
    }
}

/// Validation failures at the interaction layer.
///
/// The `Display` text is the short message shown in the status line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InteractError {
    #[error("No active output tab")]
    NoActiveTab,
    #[error("Process is not accepting input")]
    NoInputWriter,
    #[error("Input stream already closed")]
    InputClosed,
    #[error("Nothing copyable")]
    NothingToCopy,
    #[error("No match")]
    NoMatch,
    #[error("Copy failed: {0}")]
    Clipboard(String),
    #[error("Server is already running")]
    ServerAlreadyRunning,
    #[error("No tracked server is running")]
    NoServer,
    #[error("Failed to stop server: {0}")]
    StopFailed(String),
}
