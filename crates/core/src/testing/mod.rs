//! Testing utilities and mock implementations.
//!
//! `MockRtorrent` stands in for the daemon at the transport seam, so the
//! real `RtorrentClient` (batching, decoding, threshold guard, erase
//! confirmation) runs unchanged against it.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtgc_core::testing::{fixtures, MockRtorrent};
//!
//! let mock = MockRtorrent::new();
//! mock.add_download(fixtures::download("ABC", "/data")).await;
//! mock.set_erase_lag(2).await; // erased ids stay listed for two polls
//! ```

mod mock_rtorrent;

pub use mock_rtorrent::{MockDownload, MockRtorrent};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use super::MockDownload;
    use crate::torrent_client::TorrentRecord;

    /// A healthy, complete multi-file download stored at `data_dir/<id>`.
    pub fn download(id: &str, data_dir: impl AsRef<Path>) -> MockDownload {
        MockDownload {
            id: id.to_string(),
            name: id.to_string(),
            directory: data_dir.as_ref().join(id).display().to_string(),
            multi_file: true,
            message: String::new(),
            complete: true,
            tracker_url: Some("https://tracker.example/announce".to_string()),
            label: String::new(),
        }
    }

    /// A healthy, complete single-file download at `data_dir/<file_name>`.
    pub fn single_file(id: &str, data_dir: impl AsRef<Path>, file_name: &str) -> MockDownload {
        MockDownload {
            id: id.to_string(),
            name: file_name.to_string(),
            directory: data_dir.as_ref().display().to_string(),
            multi_file: false,
            message: String::new(),
            complete: true,
            tracker_url: None,
            label: String::new(),
        }
    }

    /// A record with the given base path and status message.
    pub fn record(id: &str, base_path: impl Into<PathBuf>, message: &str) -> TorrentRecord {
        let base_path = base_path.into();
        TorrentRecord {
            id: id.to_string(),
            name: base_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            tracker_host: "tracker.example".to_string(),
            directory: base_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            base_path,
            status_message: message.to_string(),
            complete: true,
            label: String::new(),
        }
    }
}
