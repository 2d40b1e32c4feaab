//! Error types for weld-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path and serde_yaml line context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The manifest file did not exist at the expected path.
    #[error("weld manifest not found at {path}")]
    ManifestNotFound { path: PathBuf },

    /// No `.weld/welded.yaml` in the start directory or any parent.
    #[error("not inside a weld (no .weld/welded.yaml above {start})")]
    NotAWeld { start: PathBuf },

    /// The manifest parsed but describes an impossible weld.
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Errors decoding synchronization markers.
///
/// Only the codec writes marker payloads, so a decode failure means the
/// recorded history is corrupt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("malformed weld marker payload {payload:?}: {reason}")]
    Parse { payload: String, reason: String },
}

impl MarkerError {
    pub(crate) fn parse(payload: &str, reason: impl Into<String>) -> Self {
        MarkerError::Parse {
            payload: payload.to_owned(),
            reason: reason.into(),
        }
    }
}
