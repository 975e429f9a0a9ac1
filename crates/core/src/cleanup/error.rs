//! Error types for the cleanup module.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::reconcile::ReconcileError;
use crate::torrent_client::TorrentClientError;

/// Errors that abort a whole cleanup batch.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A target does not resolve strictly inside any data directory.
    #[error("Path is outside the data directories: {path}")]
    ContainmentViolation { path: PathBuf },

    /// Listing, fetching or the threshold guard failed.
    #[error(transparent)]
    Directory(#[from] TorrentClientError),

    /// The data directories could not be resolved or listed.
    #[error(transparent)]
    Roots(#[from] ReconcileError),
}

/// One target that was skipped or only partly removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub path: PathBuf,
    /// Downloads associated with the target.
    pub torrent_ids: Vec<String>,
    pub reason: String,
}

impl std::fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}
