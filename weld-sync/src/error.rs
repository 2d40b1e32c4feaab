//! Error types for weld-sync.

use std::path::PathBuf;

use thiserror::Error;

use weld_core::error::{ManifestError, MarkerError};

use crate::git::GitError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The operator has to act before the command can run.
    #[error("{0}")]
    GiveUp(String),

    /// An error loading or validating the manifest.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A synchronization marker exists but cannot be decoded.
    #[error("corrupt history: {0}")]
    Marker(#[from] MarkerError),

    /// The operation store is unreadable or from another version.
    #[error("corrupt operation state: {0}")]
    CorruptState(String),

    /// git exited non-zero for an unexpected reason.
    #[error(transparent)]
    Git(#[from] GitError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (operation store).
    #[error("operation state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn give_up(msg: impl Into<String>) -> Self {
        SyncError::GiveUp(msg.into())
    }

    /// True for errors the operator can fix without touching history.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SyncError::GiveUp(_) | SyncError::Manifest(_))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
