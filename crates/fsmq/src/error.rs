//! Error types for the filesystem transport

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the transport and its processing groups
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation the filesystem transport does not implement
    /// (request-reply, temporary destinations, destination verification)
    #[error("{operation} is not supported by the filesystem transport")]
    Unsupported { operation: &'static str },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to install or run a directory watch
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },

    /// Message type tag would not survive the file-name round trip
    #[error("Invalid message type tag: {tag:?}")]
    InvalidTypeTag { tag: String },

    /// Send or subscribe was called on an already disposed instance
    #[error("Transport or processing group already disposed")]
    Disposed,
}

impl TransportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransportError::Io {
            path: path.into(),
            source,
        }
    }
}
