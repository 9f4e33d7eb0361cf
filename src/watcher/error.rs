//! Error types for the watch-set lifecycle.

use std::path::PathBuf;
use thiserror::Error;

use super::event::WatchHandle;

/// Errors from watcher operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    Registration { path: PathBuf, reason: String },

    #[error("Waiting for file system events failed: {reason}")]
    Wait { reason: String },

    #[error("Watch handle {handle} is not known to this registry")]
    InternalConsistency { handle: WatchHandle },
}

impl WatchError {
    pub(crate) fn registration(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        WatchError::Registration {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is a `Registration` error.
    pub fn is_registration(&self) -> bool {
        matches!(self, WatchError::Registration { .. })
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

impl From<walkdir::Error> for WatchError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(PathBuf::from).unwrap_or_default();
        WatchError::registration(path, e)
    }
}
