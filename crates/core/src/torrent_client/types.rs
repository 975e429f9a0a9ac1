//! Types for torrent directory operations.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::metrics;
use crate::rpc::RpcError;

/// Errors that can occur during torrent directory operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error(transparent)]
    Transport(#[from] RpcError),

    #[error(
        "Refusing to remove {requested} of {total}: exceeds safety threshold {threshold}"
    )]
    ThresholdExceeded {
        requested: usize,
        total: usize,
        threshold: f64,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("rTorrent refused to erase {ids:?}: {reason}")]
    EraseRefused { ids: Vec<String>, reason: String },
}

impl TorrentClientError {
    /// Whether the daemon reported the download as gone.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Transport(RpcError::Fault { .. }))
    }
}

/// One download in the remote client's session.
///
/// An immutable snapshot; re-query to refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Info hash as reported by the daemon.
    pub id: String,
    pub name: String,
    /// Host of the first tracker's announce URL, empty when unknown.
    pub tracker_host: String,
    /// Directory holding the download.
    pub directory: PathBuf,
    /// The single file or directory that is this download on disk.
    pub base_path: PathBuf,
    /// Tracker/daemon message, empty when healthy.
    pub status_message: String,
    /// Whether the data transfer finished.
    pub complete: bool,
    /// Free-form label (`d.custom1`).
    #[serde(default)]
    pub label: String,
}

/// Result of an erase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RemovalOutcome {
    /// None of the erased ids remain in the session.
    Confirmed,
    /// The daemon accepted the erase but some ids were still listed after
    /// every confirmation poll.
    TimedOutUnconfirmed { remaining: Vec<String> },
}

impl RemovalOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RemovalOutcome::Confirmed)
    }
}

/// Check a removal request against the safety threshold.
///
/// Fails when `requested / total` exceeds `threshold`. Requesting removals
/// from an empty session always fails.
pub fn check_removal_threshold(
    requested: usize,
    total: usize,
    threshold: f64,
) -> Result<(), TorrentClientError> {
    if requested == 0 {
        return Ok(());
    }
    let exceeded = total == 0 || (requested as f64 / total as f64) > threshold;
    if exceeded {
        warn!(requested, total, threshold, "Removal refused by safety threshold");
        metrics::THRESHOLD_REJECTIONS.inc();
        return Err(TorrentClientError::ThresholdExceeded {
            requested,
            total,
            threshold,
        });
    }
    Ok(())
}

/// Domain operations on the remote client's download set.
#[async_trait]
pub trait TorrentDirectory: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Enumerate every active download. Never partial.
    async fn list_ids(&self) -> Result<Vec<String>, TorrentClientError>;

    /// Fetch records for `ids`, in request order.
    ///
    /// Downloads that vanished between listing and fetching are skipped, so
    /// the output may be shorter than `ids`. Join results back by
    /// [`TorrentRecord::id`], never by position.
    async fn get_records(&self, ids: &[String]) -> Result<Vec<TorrentRecord>, TorrentClientError>;

    /// Erase `ids` and poll until they are gone.
    ///
    /// Fails with [`TorrentClientError::EraseRefused`] when the daemon
    /// faults an erase and still lists that download.
    ///
    /// Applies no threshold; use [`TorrentDirectory::remove_ids`] unless the
    /// aggregate request was already checked with [`check_removal_threshold`].
    async fn erase(&self, ids: &[String]) -> Result<RemovalOutcome, TorrentClientError>;

    /// List and fetch the whole session in one pass.
    async fn list_records(&self) -> Result<Vec<TorrentRecord>, TorrentClientError> {
        let ids = self.list_ids().await?;
        self.get_records(&ids).await
    }

    /// Erase `ids` unless they make up more than `fail_past_threshold` of
    /// the session. Nothing is mutated when the guard trips.
    async fn remove_ids(
        &self,
        ids: &[String],
        fail_past_threshold: f64,
    ) -> Result<RemovalOutcome, TorrentClientError> {
        if ids.is_empty() {
            return Ok(RemovalOutcome::Confirmed);
        }
        let total = self.list_ids().await?.len();
        check_removal_threshold(ids.len(), total, fail_past_threshold)?;
        self.erase(ids).await
    }
}
