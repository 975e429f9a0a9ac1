//! Problem categories and the items scans report.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::torrent_client::TorrentRecord;

/// Category assigned to a download or path. Recomputed on every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProblemType {
    Healthy,
    Unregistered,
    MissingFiles,
    Orphaned,
    Unknown,
    Timeout,
}

impl ProblemType {
    pub const ALL: [ProblemType; 6] = [
        ProblemType::Healthy,
        ProblemType::Unregistered,
        ProblemType::MissingFiles,
        ProblemType::Orphaned,
        ProblemType::Unknown,
        ProblemType::Timeout,
    ];

    /// Returns the string representation used in reports and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Healthy => "healthy",
            ProblemType::Unregistered => "unregistered",
            ProblemType::MissingFiles => "missingFiles",
            ProblemType::Orphaned => "orphaned",
            ProblemType::Unknown => "unknown",
            ProblemType::Timeout => "timeout",
        }
    }

    pub fn is_problem(&self) -> bool {
        *self != ProblemType::Healthy
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProblemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProblemType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown problem type: {s}"))
    }
}

/// A path that needs operator attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemItem {
    pub path: PathBuf,
    /// Apparent size in bytes; zero when the path is missing.
    pub size: u64,
    #[serde(rename = "type")]
    pub problem: ProblemType,
    /// The classified download, for items derived from the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent: Option<TorrentRecord>,
    /// Downloads whose base path is this path, for orphans.
    #[serde(default)]
    pub related_torrents: Vec<TorrentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}
