//! Messages exchanged with a UI endpoint

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A file path with its text content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: String,
}

/// Requests a UI endpoint may issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "camelCase")]
pub enum Request {
    /// Handshake, answered with the app version
    GetVersion,
    StartWatching(PathBuf),
    StopWatching(PathBuf),
    SaveFile(FileContent),
}

/// Notifications pushed to a UI endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "camelCase")]
pub enum Push {
    Version(String),
    File(FileContent),
    Error(String),
}

impl Push {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::File(_) => "file",
            Self::Error(_) => "error",
        }
    }
}
