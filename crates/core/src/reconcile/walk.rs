//! Directory traversal for the orphan scan.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::ReconcileError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ReconcileError + '_ {
    move |source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Immediate children of `root`, each joined onto `root`, sorted by name.
pub(crate) async fn child_paths(root: &Path) -> Result<Vec<PathBuf>, ReconcileError> {
    let mut entries = fs::read_dir(root).await.map_err(io_error(root))?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(root))? {
        children.push(root.join(entry.file_name()));
    }
    children.sort();
    Ok(children)
}

#[cfg(unix)]
fn link_count(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
fn link_count(_meta: &Metadata) -> u64 {
    1
}

/// Every regular file under `root` with more than one hard link.
///
/// Directory symlinks are followed; each real directory is read once, so
/// symlink cycles terminate. Broken symlinks are logged and skipped.
/// Returned paths are as reached by the walk, not canonicalized.
pub(crate) async fn hardlinked_files(root: &Path) -> Result<Vec<PathBuf>, ReconcileError> {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack = vec![root.to_path_buf()];
    let mut linked = Vec::new();

    while let Some(dir) = stack.pop() {
        let real = fs::canonicalize(&dir).await.map_err(io_error(&dir))?;
        if !visited.insert(real) {
            debug!(path = %dir.display(), "Directory already walked, skipping");
            continue;
        }

        let mut entries = fs::read_dir(&dir).await.map_err(io_error(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_error(&path))?;

            if file_type.is_dir() {
                stack.push(path);
                continue;
            }

            let meta = if file_type.is_symlink() {
                match fs::metadata(&path).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping broken symlink");
                        continue;
                    }
                }
            } else {
                entry.metadata().await.map_err(io_error(&path))?
            };

            if meta.is_dir() {
                stack.push(path);
            } else if meta.is_file() && link_count(&meta) > 1 {
                linked.push(path);
            }
        }
    }

    debug!(root = %root.display(), count = linked.len(), "Collected hardlinked files");
    Ok(linked)
}
