//! Error taxonomy for the sync engine.

use std::path::PathBuf;

use github_gateway::ApiError;

use crate::git::GitError;

/// Errors produced by discovery, edit decoding and commits.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("path {} is outside storage root {}", path.display(), root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The branch tip kept moving under the atomic commit.
    #[error("branch head changed during {attempts} commit attempts")]
    HeadConflict { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Map discovery-time API failures, turning rejected credentials into
    /// [`SyncError::Unauthorized`].
    pub fn from_discovery(err: ApiError) -> Self {
        match err.status() {
            Some(401) | Some(403) => SyncError::Unauthorized(err.to_string()),
            Some(404) => SyncError::NotFound(err.to_string()),
            _ => SyncError::Api(err),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
