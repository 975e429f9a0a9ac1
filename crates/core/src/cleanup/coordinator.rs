//! Removal of paths and the downloads that own them.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use super::error::{CleanupError, TargetFailure};
use crate::metrics;
use crate::reconcile::{disk_usage, DataRoots};
use crate::torrent_client::{
    check_removal_threshold, RemovalOutcome, TorrentDirectory, TorrentRecord,
};

/// Outcome of a cleanup batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupResult {
    pub removed_paths: Vec<PathBuf>,
    /// Downloads whose erase was accepted.
    pub removed_torrents: Vec<TorrentRecord>,
    pub total_size_removed: u64,
    pub failures: Vec<TargetFailure>,
}

impl CleanupResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes paths under the data directories, erasing their downloads first.
///
/// Runs are not synchronized with each other; callers must not run two
/// cleanups against the same roots at once.
pub struct CleanupCoordinator {
    roots: Vec<PathBuf>,
    fail_past_threshold: f64,
    directory: Arc<dyn TorrentDirectory>,
}

impl CleanupCoordinator {
    pub fn new(
        roots: Vec<PathBuf>,
        fail_past_threshold: f64,
        directory: Arc<dyn TorrentDirectory>,
    ) -> Self {
        Self {
            roots,
            fail_past_threshold,
            directory,
        }
    }

    /// Resolve the data directories and check every target against them.
    ///
    /// A target must be absolute, free of `..`, and strictly below a root
    /// both as written and with its parent's symlinks resolved.
    pub async fn check_containment(&self, targets: &[PathBuf]) -> Result<DataRoots, CleanupError> {
        let roots = DataRoots::resolve(&self.roots).await?;
        for path in targets {
            if !roots.contains_target(path).await {
                warn!(path = %path.display(), "Refusing cleanup outside data directories");
                return Err(CleanupError::ContainmentViolation { path: path.clone() });
            }
        }
        Ok(roots)
    }

    /// Remove every target and its associated downloads.
    ///
    /// Nothing is touched unless every target is contained and the batch
    /// passes the threshold guard twice: once for the targets present on
    /// disk against every base path under the roots, once for the
    /// associated downloads against the session. After that, a target
    /// whose erase or delete fails is reported in `failures` and the
    /// remaining targets still run.
    pub async fn cleanup(&self, targets: &[PathBuf]) -> Result<CleanupResult, CleanupError> {
        let roots = self.check_containment(targets).await?;

        let mut seen = HashSet::new();
        let targets: Vec<&PathBuf> = targets.iter().filter(|t| seen.insert(*t)).collect();

        let mut present = 0;
        for target in &targets {
            if fs::symlink_metadata(target).await.is_ok() {
                present += 1;
            }
        }
        let all_paths = roots.base_paths().await?.len();
        check_removal_threshold(present, all_paths, self.fail_past_threshold)?;

        let ids = self.directory.list_ids().await?;
        let total = ids.len();
        let records = self.directory.get_records(&ids).await?;
        let mut by_base_path: HashMap<PathBuf, Vec<TorrentRecord>> = HashMap::new();
        for record in records {
            // Records outside the roots can never match a contained target.
            let key = roots
                .normalize(&record.base_path)
                .unwrap_or_else(|| record.base_path.clone());
            by_base_path.entry(key).or_default().push(record);
        }

        let associated: usize = targets
            .iter()
            .filter_map(|t| by_base_path.get(*t))
            .map(Vec::len)
            .sum();
        check_removal_threshold(associated, total, self.fail_past_threshold)?;

        debug!(
            targets = targets.len(),
            present,
            paths = all_paths,
            torrents = associated,
            session = total,
            "Starting cleanup"
        );

        let mut result = CleanupResult::default();
        for target in targets {
            let owners = by_base_path.remove(target).unwrap_or_default();
            self.remove_target(target, owners, &mut result).await;
        }

        info!(
            paths = result.removed_paths.len(),
            torrents = result.removed_torrents.len(),
            bytes = result.total_size_removed,
            failures = result.failures.len(),
            "Cleanup finished"
        );
        Ok(result)
    }

    /// Erase the target's downloads, then delete it from disk.
    async fn remove_target(
        &self,
        target: &Path,
        owners: Vec<TorrentRecord>,
        result: &mut CleanupResult,
    ) {
        let torrent_ids: Vec<String> = owners.iter().map(|r| r.id.clone()).collect();
        let fail = |result: &mut CleanupResult, reason: String| {
            warn!(path = %target.display(), reason = %reason, "Cleanup target failed");
            metrics::TARGET_FAILURES.inc();
            result.failures.push(TargetFailure {
                path: target.to_path_buf(),
                torrent_ids: torrent_ids.clone(),
                reason,
            });
        };

        let size = match disk_usage(target).await {
            Ok(usage) => usage.size,
            Err(e) => {
                fail(result, format!("failed to measure: {e}"));
                return;
            }
        };

        if !owners.is_empty() {
            match self.directory.erase(&torrent_ids).await {
                Ok(RemovalOutcome::Confirmed) => {}
                Ok(RemovalOutcome::TimedOutUnconfirmed { remaining }) => {
                    warn!(path = %target.display(), remaining = ?remaining, "Erase not confirmed, deleting anyway");
                }
                Err(e) => {
                    fail(result, format!("erase failed: {e}"));
                    return;
                }
            }
            for record in &owners {
                info!(id = %record.id, name = %record.name, "Removed torrent");
            }
            result.removed_torrents.extend(owners);
        }

        match delete_path(target).await {
            Ok(()) => {
                info!(path = %target.display(), bytes = size, "Removed path");
                metrics::PATHS_REMOVED.inc();
                metrics::BYTES_REMOVED.inc_by(size);
                result.removed_paths.push(target.to_path_buf());
                result.total_size_removed += size;
            }
            Err(e) => fail(result, format!("delete failed: {e}")),
        }
    }
}

/// Recursively delete `path` without following symlinks. Already gone is fine.
async fn delete_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match removed {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcError;
    use crate::testing::{fixtures, MockRtorrent};
    use crate::torrent_client::{ConfirmPolicy, RtorrentClient, TorrentClientError};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        root: PathBuf,
        mock: MockRtorrent,
        coordinator: CleanupCoordinator,
    }

    async fn fixture(threshold: f64) -> Fixture {
        let data = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        let mock = MockRtorrent::new();
        let client = RtorrentClient::new(Arc::new(mock.clone())).with_confirm_policy(
            ConfirmPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        let coordinator = CleanupCoordinator::new(vec![root.clone()], threshold, Arc::new(client));
        Fixture {
            _data: data,
            root,
            mock,
            coordinator,
        }
    }

    fn make_dir(path: &Path, bytes: usize) {
        std::fs::create_dir_all(path).unwrap();
        std::fs::write(path.join("payload"), vec![1u8; bytes]).unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_erases_then_deletes() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 100);
        make_dir(&f.root.join("B"), 50);
        f.mock.add_download(fixtures::download("A", &f.root)).await;
        f.mock.add_download(fixtures::download("KEEP", &f.root)).await;

        let result = f
            .coordinator
            .cleanup(&[f.root.join("A"), f.root.join("B")])
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.removed_paths, vec![f.root.join("A"), f.root.join("B")]);
        assert_eq!(result.total_size_removed, 150);
        assert_eq!(result.removed_torrents.len(), 1);
        assert_eq!(result.removed_torrents[0].id, "A");
        assert_eq!(f.mock.erased().await, vec!["A"]);
        assert!(f.mock.has_torrent("KEEP").await);
        assert!(!f.root.join("A").exists());
        assert!(!f.root.join("B").exists());
    }

    #[tokio::test]
    async fn test_outside_target_rejects_whole_batch() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 10);
        f.mock.add_download(fixtures::download("A", &f.root)).await;
        let outside = TempDir::new().unwrap();

        let result = f
            .coordinator
            .cleanup(&[f.root.join("A"), outside.path().join("x")])
            .await;

        assert!(matches!(result, Err(CleanupError::ContainmentViolation { .. })));
        assert!(f.mock.calls().await.is_empty());
        assert!(f.root.join("A").exists());
    }

    #[tokio::test]
    async fn test_containment_rules() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 1);
        assert!(f.coordinator.check_containment(&[f.root.join("A")]).await.is_ok());
        assert!(f
            .coordinator
            .check_containment(&[f.root.join("A/payload")])
            .await
            .is_ok());
        for bad in [
            f.root.clone(),
            f.root.join("A/../../etc"),
            PathBuf::from("relative/A"),
        ] {
            assert!(matches!(
                f.coordinator.check_containment(&[bad]).await,
                Err(CleanupError::ContainmentViolation { .. })
            ));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_target_behind_symlinked_parent_is_refused() {
        let f = fixture(1.0).await;
        let outside = TempDir::new().unwrap();
        make_dir(&outside.path().join("precious"), 10);
        std::os::unix::fs::symlink(outside.path(), f.root.join("escape")).unwrap();

        let result = f
            .coordinator
            .cleanup(&[f.root.join("escape/precious")])
            .await;

        assert!(matches!(result, Err(CleanupError::ContainmentViolation { .. })));
        assert!(f.mock.calls().await.is_empty());
        assert!(outside.path().join("precious/payload").exists());
    }

    #[tokio::test]
    async fn test_threshold_blocks_before_any_erase() {
        let f = fixture(0.5).await;
        for id in ["A", "B", "C"] {
            make_dir(&f.root.join(id), 1);
            f.mock.add_download(fixtures::download(id, &f.root)).await;
        }
        make_dir(&f.root.join("D"), 1);

        // Two of four paths pass; two of three downloads do not.
        let result = f
            .coordinator
            .cleanup(&[f.root.join("A"), f.root.join("B")])
            .await;

        assert!(matches!(
            result,
            Err(CleanupError::Directory(TorrentClientError::ThresholdExceeded {
                requested: 2,
                total: 3,
                ..
            }))
        ));
        assert_eq!(f.mock.erase_count().await, 0);
        assert!(f.root.join("A").exists());
    }

    #[tokio::test]
    async fn test_threshold_counts_orphan_paths() {
        let f = fixture(0.1).await;
        let targets: Vec<PathBuf> = (0..10).map(|i| f.root.join(format!("orphan{i}"))).collect();
        for target in &targets {
            make_dir(target, 1);
        }

        let result = f.coordinator.cleanup(&targets).await;

        assert!(matches!(
            result,
            Err(CleanupError::Directory(TorrentClientError::ThresholdExceeded {
                requested: 10,
                total: 10,
                ..
            }))
        ));
        assert!(f.mock.calls().await.is_empty());
        assert!(targets.iter().all(|t| t.exists()));

        let one = f.coordinator.cleanup(&targets[..1]).await.unwrap();
        assert_eq!(one.removed_paths, vec![targets[0].clone()]);
    }

    #[tokio::test]
    async fn test_refused_erase_keeps_data() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 10);
        make_dir(&f.root.join("B"), 20);
        f.mock.add_download(fixtures::download("A", &f.root)).await;
        f.mock.add_download(fixtures::download("B", &f.root)).await;
        f.mock.refuse_erase("A").await;

        let result = f
            .coordinator
            .cleanup(&[f.root.join("A"), f.root.join("B")])
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, f.root.join("A"));
        assert!(result.failures[0].reason.contains("refused"));
        assert!(f.mock.has_torrent("A").await);
        assert!(f.root.join("A").exists());
        let removed: Vec<&str> = result.removed_torrents.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(removed, vec!["B"]);
        assert!(!f.root.join("B").exists());
    }

    #[tokio::test]
    async fn test_erase_failure_skips_target_and_continues() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 10);
        make_dir(&f.root.join("B"), 20);
        f.mock.add_download(fixtures::download("A", &f.root)).await;
        f.mock.add_download(fixtures::download("B", &f.root)).await;
        f.mock.fail_erase("A", RpcError::Timeout).await;

        let result = f
            .coordinator
            .cleanup(&[f.root.join("A"), f.root.join("B")])
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, f.root.join("A"));
        assert_eq!(result.failures[0].torrent_ids, vec!["A"]);
        assert!(f.root.join("A").exists());
        assert_eq!(result.removed_paths, vec![f.root.join("B")]);
        assert_eq!(result.total_size_removed, 20);
        assert!(!f.root.join("B").exists());
    }

    #[tokio::test]
    async fn test_missing_target_counts_as_removed() {
        let f = fixture(1.0).await;
        let result = f.coordinator.cleanup(&[f.root.join("gone")]).await.unwrap();
        assert_eq!(result.removed_paths, vec![f.root.join("gone")]);
        assert_eq!(result.total_size_removed, 0);
    }

    #[tokio::test]
    async fn test_single_file_target_and_duplicates() {
        let f = fixture(1.0).await;
        std::fs::write(f.root.join("movie.mkv"), vec![0u8; 30]).unwrap();
        f.mock
            .add_download(fixtures::single_file("M", &f.root, "movie.mkv"))
            .await;

        let target = f.root.join("movie.mkv");
        let result = f
            .coordinator
            .cleanup(&[target.clone(), target.clone()])
            .await
            .unwrap();

        assert_eq!(result.removed_paths, vec![target.clone()]);
        assert_eq!(result.total_size_removed, 30);
        assert_eq!(f.mock.erased().await, vec!["M"]);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_unconfirmed_erase_still_deletes() {
        let f = fixture(1.0).await;
        make_dir(&f.root.join("A"), 5);
        f.mock.add_download(fixtures::download("A", &f.root)).await;
        f.mock.set_erase_lag(100).await;

        let result = f.coordinator.cleanup(&[f.root.join("A")]).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.removed_torrents.len(), 1);
        assert!(!f.root.join("A").exists());
    }
}
