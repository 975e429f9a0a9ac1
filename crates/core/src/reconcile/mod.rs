//! Filesystem reconciliation.
//!
//! Finds base paths under the data directories that nothing holds: a base
//! path is held when any file under it is hard-linked from elsewhere. Whether
//! a path belongs to a live download is the caller's concern; this module
//! only looks at the disk and the link graph.

mod usage;
mod walk;

pub use usage::{disk_usage, PathUsage};

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::problem::{ProblemItem, ProblemType};
use crate::torrent_client::TorrentRecord;

/// Errors from the orphan scan.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("No data directories configured")]
    NoRoots,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A download's base path lies outside every data directory.
    #[error("Torrent {id} has base path {path} outside the data directories")]
    OutsideRoots { id: String, path: PathBuf },
}

/// A configured root and its real location.
#[derive(Debug, Clone)]
struct Root {
    configured: PathBuf,
    canonical: PathBuf,
}

impl Root {
    async fn resolve(configured: &Path) -> Result<Self, ReconcileError> {
        let canonical = fs::canonicalize(configured)
            .await
            .map_err(|source| ReconcileError::Io {
                path: configured.to_path_buf(),
                source,
            })?;
        Ok(Self {
            configured: configured.to_path_buf(),
            canonical,
        })
    }

    /// `path` rewritten under the configured root, when it lies under
    /// either form of this root.
    fn normalize(&self, path: &Path) -> Option<PathBuf> {
        if path.starts_with(&self.configured) {
            return Some(path.to_path_buf());
        }
        let relative = path.strip_prefix(&self.canonical).ok()?;
        Some(self.configured.join(relative))
    }
}

/// The data directories, each with its symlinks resolved.
///
/// Downloads may report paths under a root's real location while the
/// configuration names it through a symlink. Every path handed out is
/// expressed under the configured root.
#[derive(Debug, Clone)]
pub struct DataRoots {
    roots: Vec<Root>,
}

impl DataRoots {
    /// Resolve every configured root. Fails when one does not exist.
    pub async fn resolve(configured: &[PathBuf]) -> Result<Self, ReconcileError> {
        if configured.is_empty() {
            return Err(ReconcileError::NoRoots);
        }
        let roots = try_join_all(configured.iter().map(|r| Root::resolve(r))).await?;
        Ok(Self { roots })
    }

    /// `path` expressed under its configured root, `None` outside every root.
    pub fn normalize(&self, path: &Path) -> Option<PathBuf> {
        self.roots.iter().find_map(|root| root.normalize(path))
    }

    /// Rewrite each record's base path under its configured root.
    ///
    /// Fails on the first record outside every root.
    pub fn normalize_records(
        &self,
        records: &[TorrentRecord],
    ) -> Result<Vec<TorrentRecord>, ReconcileError> {
        records
            .iter()
            .map(|record| {
                let base_path = self.normalize(&record.base_path).ok_or_else(|| {
                    ReconcileError::OutsideRoots {
                        id: record.id.clone(),
                        path: record.base_path.clone(),
                    }
                })?;
                Ok(TorrentRecord {
                    base_path,
                    ..record.clone()
                })
            })
            .collect()
    }

    /// Every immediate child of every root.
    pub async fn base_paths(&self) -> Result<Vec<PathBuf>, ReconcileError> {
        Ok(
            try_join_all(self.roots.iter().map(|root| walk::child_paths(&root.configured)))
                .await?
                .into_iter()
                .flatten()
                .collect(),
        )
    }

    /// Whether `path` lies strictly below a root, both as written and once
    /// the symlinks in its parent are resolved.
    ///
    /// The final component is left alone, so a symlinked target is judged by
    /// where the link sits rather than where it points. Targets whose parent
    /// cannot be resolved are rejected.
    pub async fn contains_target(&self, path: &Path) -> bool {
        if !path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        if !self
            .roots
            .iter()
            .any(|root| path.starts_with(&root.configured) && path != root.configured)
        {
            return false;
        }

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        let real = match fs::canonicalize(parent).await {
            Ok(parent) => parent.join(name),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot resolve target parent");
                return false;
            }
        };
        self.roots
            .iter()
            .any(|root| real.starts_with(&root.canonical) && real != root.canonical)
    }
}

/// Base path that `real_path` falls under, expressed under the configured
/// root. `None` when it escapes every root or is a root itself.
fn held_base_path(real_path: &Path, roots: &[Root]) -> Option<PathBuf> {
    roots.iter().find_map(|root| {
        let relative = real_path.strip_prefix(&root.canonical).ok()?;
        match relative.components().next()? {
            Component::Normal(first) => Some(root.configured.join(first)),
            _ => None,
        }
    })
}

/// Find orphaned base paths under `roots`.
///
/// `records` is the full record list used to attach `related_torrents`;
/// every record's base path must lie under a root, as configured or as
/// resolved. Roots are walked concurrently; orphans are measured
/// `concurrency` at a time.
pub async fn scan_orphans(
    roots: &DataRoots,
    records: &[TorrentRecord],
    concurrency: usize,
) -> Result<Vec<ProblemItem>, ReconcileError> {
    let records = roots.normalize_records(records)?;
    let all_base_paths = roots.base_paths().await?;

    let linked_files: Vec<PathBuf> =
        try_join_all(roots.roots.iter().map(|root| walk::hardlinked_files(&root.configured)))
            .await?
            .into_iter()
            .flatten()
            .collect();

    let mut held: BTreeSet<PathBuf> = BTreeSet::new();
    for file in &linked_files {
        let real = fs::canonicalize(file)
            .await
            .map_err(|source| ReconcileError::Io {
                path: file.clone(),
                source,
            })?;
        match held_base_path(&real, &roots.roots) {
            Some(base) => {
                held.insert(base);
            }
            None => warn!(path = %real.display(), "Skipping hardlinked file outside data directories"),
        }
    }

    let orphaned: Vec<PathBuf> = all_base_paths
        .iter()
        .filter(|path| !held.contains(*path))
        .cloned()
        .collect();

    debug!(
        total = all_base_paths.len(),
        held = held.len(),
        orphaned = orphaned.len(),
        "Computed orphan set"
    );

    let mut related: HashMap<&Path, Vec<TorrentRecord>> = HashMap::new();
    for record in &records {
        related
            .entry(record.base_path.as_path())
            .or_default()
            .push(record.clone());
    }

    let items: Vec<ProblemItem> = stream::iter(orphaned)
        .map(|path| async move {
            let usage = disk_usage(&path)
                .await
                .map_err(|source| ReconcileError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok::<_, ReconcileError>((path, usage))
        })
        .buffered(concurrency.max(1))
        .map_ok(|(path, usage)| ProblemItem {
            related_torrents: related.get(path.as_path()).cloned().unwrap_or_default(),
            path,
            size: usage.size,
            problem: ProblemType::Orphaned,
            torrent: None,
            last_modified: usage.last_modified,
        })
        .try_collect()
        .await?;

    info!(
        count = items.len(),
        bytes = items.iter().map(|i| i.size).sum::<u64>(),
        "Orphan scan complete"
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    fn write(path: &Path, bytes: usize) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, vec![7u8; bytes]).unwrap();
    }

    fn paths(items: &[ProblemItem]) -> Vec<PathBuf> {
        items.iter().map(|i| i.path.clone()).collect()
    }

    async fn data_roots(paths: &[PathBuf]) -> DataRoots {
        DataRoots::resolve(paths).await.unwrap()
    }

    #[tokio::test]
    async fn test_hardlinked_child_is_held() {
        let data = TempDir::new().unwrap();
        let seed = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        write(&root.join("A/file"), 10);
        write(&root.join("B/file"), 20);
        std::fs::hard_link(root.join("B/file"), seed.path().join("file")).unwrap();

        let items = scan_orphans(&data_roots(&[root.clone()]).await, &[], 4).await.unwrap();
        assert_eq!(paths(&items), vec![root.join("A")]);
        assert_eq!(items[0].size, 10);
        assert_eq!(items[0].problem, ProblemType::Orphaned);
        assert!(items[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_orphans_are_subset_and_disjoint_from_held() {
        let data = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        write(&root.join("A/x"), 1);
        write(&root.join("B/y"), 1);
        write(&root.join("C.mkv"), 1);
        std::fs::hard_link(root.join("B/y"), root.join("C.mkv.link")).unwrap();

        let items = scan_orphans(&data_roots(&[root.clone()]).await, &[], 2).await.unwrap();
        let orphaned = paths(&items);
        let all = walk::child_paths(&root).await.unwrap();
        assert!(orphaned.iter().all(|p| all.contains(p)));
        // B and the link's own base path are both held
        assert_eq!(orphaned, vec![root.join("A"), root.join("C.mkv")]);
    }

    #[tokio::test]
    async fn test_related_torrents_attached_by_base_path() {
        let data = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        write(&root.join("A/file"), 5);

        let records = vec![
            fixtures::record("H1", root.join("A"), ""),
            fixtures::record("H2", root.join("A"), "Tracker: [Unregistered]"),
            fixtures::record("H3", root.join("Z"), ""),
        ];
        let items = scan_orphans(&data_roots(&[root.clone()]).await, &records, 1).await.unwrap();
        assert_eq!(items.len(), 1);
        let ids: Vec<&str> = items[0]
            .related_torrents
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["H1", "H2"]);
    }

    #[tokio::test]
    async fn test_record_outside_roots_is_error() {
        let data = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let records = vec![fixtures::record("X", elsewhere.path().join("X"), "")];

        let result = scan_orphans(&data_roots(&[data.path().to_path_buf()]).await, &records, 1).await;
        assert!(matches!(
            result,
            Err(ReconcileError::OutsideRoots { ref id, .. }) if id == "X"
        ));
    }

    #[tokio::test]
    async fn test_no_roots() {
        let result = DataRoots::resolve(&[]).await;
        assert!(matches!(result, Err(ReconcileError::NoRoots)));
    }

    #[tokio::test]
    async fn test_link_into_other_root_holds_that_root_child() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(&first.path().join("A/file"), 3);
        write(&second.path().join("B/file"), 3);
        std::fs::hard_link(
            first.path().join("A/file"),
            second.path().join("B/copy"),
        )
        .unwrap();

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let items = scan_orphans(&data_roots(&roots).await, &[], 2).await.unwrap();
        assert!(items.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_escaping_link_is_skipped() {
        let data = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        write(&outside.path().join("real"), 4);
        std::fs::hard_link(outside.path().join("real"), outside.path().join("real2")).unwrap();
        std::fs::create_dir(root.join("A")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("A/ext")).unwrap();

        // A's only linked files resolve outside the root, so A is not held
        let items = scan_orphans(&data_roots(&[root.clone()]).await, &[], 1).await.unwrap();
        assert_eq!(paths(&items), vec![root.join("A")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_root_maps_real_paths_to_configured_root() {
        let real = TempDir::new().unwrap();
        let links = TempDir::new().unwrap();
        let root = links.path().join("data");
        std::os::unix::fs::symlink(real.path(), &root).unwrap();
        write(&real.path().join("LIVE/file"), 5);

        let roots = data_roots(&[root.clone()]).await;
        assert_eq!(
            roots.normalize(&real.path().canonicalize().unwrap().join("LIVE")),
            Some(root.join("LIVE"))
        );
        assert_eq!(roots.normalize(&root.join("LIVE")), Some(root.join("LIVE")));
        assert_eq!(roots.normalize(links.path()), None);

        let records = vec![fixtures::record(
            "LIVE",
            real.path().canonicalize().unwrap().join("LIVE"),
            "",
        )];
        let items = scan_orphans(&roots, &records, 1).await.unwrap();
        assert_eq!(paths(&items), vec![root.join("LIVE")]);
        assert_eq!(items[0].related_torrents[0].base_path, root.join("LIVE"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_contains_target_resolves_parent_symlinks() {
        let data = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = data.path().to_path_buf();
        write(&root.join("A/file"), 1);
        write(&outside.path().join("precious/file"), 1);
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("precious"), root.join("link")).unwrap();

        let roots = data_roots(&[root.clone()]).await;
        assert!(roots.contains_target(&root.join("A")).await);
        assert!(roots.contains_target(&root.join("A/file")).await);
        assert!(roots.contains_target(&root.join("gone")).await);
        // The link itself sits inside the root; only its parent is resolved.
        assert!(roots.contains_target(&root.join("link")).await);
        assert!(!roots.contains_target(&root.join("escape/precious")).await);
        assert!(!roots.contains_target(&root.join("missing/deeper")).await);
        assert!(!roots.contains_target(&root).await);
        assert!(!roots.contains_target(&root.join("A/../../etc")).await);
        assert!(!roots.contains_target(Path::new("relative/A")).await);
    }

    #[test]
    fn test_held_base_path_mapping() {
        let roots = vec![Root {
            configured: PathBuf::from("/data"),
            canonical: PathBuf::from("/mnt/disk1/data"),
        }];
        assert_eq!(
            held_base_path(Path::new("/mnt/disk1/data/Show/S01/e1.mkv"), &roots),
            Some(PathBuf::from("/data/Show"))
        );
        assert_eq!(held_base_path(Path::new("/mnt/disk1/data"), &roots), None);
        assert_eq!(held_base_path(Path::new("/elsewhere/file"), &roots), None);
    }
}
