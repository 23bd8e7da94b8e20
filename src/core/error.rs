//! Errors raised while mirroring a watched file

use std::path::PathBuf;

use thiserror::Error;

/// Failures scoped to a single watch context
#[derive(Debug, Error)]
pub enum SyncError {
    /// Decoded content carried a replacement character
    #[error("Can not open binary file.")]
    BinaryFile { path: PathBuf },

    #[error("{source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The change observer stopped or could not be installed
    #[error("watcher for {path} failed: {reason}")]
    Observer { path: PathBuf, reason: String },
}

impl SyncError {
    /// The path the failure refers to
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::BinaryFile { path }
            | Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Observer { path, .. } => path,
        }
    }
}
