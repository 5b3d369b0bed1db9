//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Core error.
    #[error(transparent)]
    Core(#[from] looper_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage could not be used at startup.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] std::io::Error),

    /// Another track is already recording.
    #[error("Track {recording} is already recording")]
    AlreadyRecording { recording: usize },

    /// Track index out of range.
    #[error("Invalid track index: {0}")]
    InvalidTrack(usize),

    /// Loop slot index out of range.
    #[error("Invalid loop slot: {0} (0-99)")]
    InvalidLoop(usize),

    /// Cache has no path to operate on.
    #[error("Cache has no bound path")]
    PathUnbound,

    /// A file could not be opened.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Butler error.
    #[error("Butler error: {0}")]
    Butler(String),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
