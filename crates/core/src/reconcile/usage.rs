//! Apparent disk usage of a path.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;

/// Size and modification time of a file or directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathUsage {
    /// Sum of the lengths of every non-directory entry. Symlinks count
    /// as themselves and are not followed.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Measure `path`. A missing path measures as zero with no mtime.
pub async fn disk_usage(path: &Path) -> io::Result<PathUsage> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PathUsage::default()),
        Err(e) => return Err(e),
    };
    let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);

    if !meta.is_dir() {
        return Ok(PathUsage {
            size: meta.len(),
            last_modified,
        });
    }

    let mut size = 0u64;
    let mut stack: Vec<PathBuf> = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                size = size.saturating_add(entry.metadata().await?.len());
            }
        }
    }

    Ok(PathUsage {
        size,
        last_modified,
    })
}
