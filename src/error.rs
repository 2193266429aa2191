//! Error types for the log sink

use std::io;
use std::path::PathBuf;

/// Result type for log sink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the log sink
///
/// Only setup and configuration fail loudly. Once the sink is running, write,
/// rotation and recycling failures are reported to the original stderr and the
/// workers keep going.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to create the log directory
    #[error("Failed to create log directory at {path}: {source}")]
    CreateDirectory {
        /// The directory that could not be created
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Failed to point the standard streams at a log file
    #[error("Failed to redirect output to {path}: {source}")]
    Redirect {
        /// The log file that could not be opened
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Configuration values are out of range
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A worker thread could not be spawned
    #[error("Failed to spawn {name} worker: {source}")]
    Spawn {
        /// Worker name
        name: &'static str,
        /// The underlying error
        source: io::Error,
    },
}
