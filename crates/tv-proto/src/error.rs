//! Failure taxonomy shared by the extractor and the playback controller.

use std::path::PathBuf;

use thiserror::Error;

/// Catalog retrieval failed before any parsing happened.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Conditions that stop the player before it becomes interactive.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no channels found or failed to load channels")]
    EmptyCatalog,
}

/// A `select(index)` request that could not be turned into playback.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("channel index {index} out of range (catalog has {len} entries)")]
    OutOfRange { index: usize, len: usize },
    #[error("channel {index} has no stream URL")]
    MissingUrl { index: usize },
}

/// Synchronous playback engine failures.  Asynchronous ones arrive as
/// `PlayerEvent::EngineError` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("playback engine unavailable: {0}")]
    Unavailable(String),
    #[error("playback engine command failed: {0}")]
    Command(String),
}
