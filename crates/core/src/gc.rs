//! The scan pipeline and the entry points the binary drives.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::classify::{classify, RuleError, RuleSet};
use crate::cleanup::{CleanupCoordinator, CleanupError, CleanupResult};
use crate::config::Config;
use crate::metrics;
use crate::problem::{ProblemItem, ProblemType};
use crate::reconcile::{disk_usage, scan_orphans, DataRoots, ReconcileError};
use crate::rpc::RpcError;
use crate::torrent_client::{RemovalOutcome, RtorrentClient, TorrentClientError, TorrentDirectory};

#[derive(Debug, Error)]
pub enum GcError {
    #[error("Invalid rules: {0}")]
    Rules(#[from] RuleError),

    #[error("Invalid rTorrent endpoint: {0}")]
    Endpoint(#[from] RpcError),

    #[error(transparent)]
    Directory(#[from] TorrentClientError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Path count and size for one slice of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub paths: usize,
    pub size: u64,
}

impl Tally {
    fn add(&mut self, size: u64) {
        self.paths += 1;
        self.size += size;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Downloads in the session at scan time.
    pub torrents: usize,
    pub total: Tally,
    pub by_type: BTreeMap<ProblemType, Tally>,
}

/// Everything a scan found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub items: Vec<ProblemItem>,
    pub summary: ScanSummary,
}

impl ScanReport {
    pub fn new(torrents: usize, items: Vec<ProblemItem>) -> Self {
        let mut summary = ScanSummary {
            torrents,
            ..ScanSummary::default()
        };
        for item in &items {
            summary.total.add(item.size);
            summary.by_type.entry(item.problem).or_default().add(item.size);
        }
        Self { items, summary }
    }

    /// Count and size of the reported items at `paths`.
    pub fn selection(&self, paths: &[PathBuf]) -> Tally {
        let wanted: HashSet<&PathBuf> = paths.iter().collect();
        let mut seen = HashSet::new();
        let mut tally = Tally::default();
        for item in &self.items {
            if wanted.contains(&item.path) && seen.insert(&item.path) {
                tally.add(item.size);
            }
        }
        tally
    }

    /// Distinct paths of every item whose type is in `types`, in report order.
    pub fn paths_of(&self, types: &[ProblemType]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|item| types.contains(&item.problem))
            .filter(|item| seen.insert(&item.path))
            .map(|item| item.path.clone())
            .collect()
    }
}

/// Scans the session and data directories, and removes what it is told to.
pub struct GarbageCollector {
    directory: Arc<dyn TorrentDirectory>,
    roots: Vec<PathBuf>,
    rules: RuleSet,
    fail_past_threshold: f64,
    concurrency: usize,
}

impl GarbageCollector {
    pub fn new(directory: Arc<dyn TorrentDirectory>, roots: Vec<PathBuf>, rules: RuleSet) -> Self {
        Self {
            directory,
            roots,
            rules,
            fail_past_threshold: 0.1,
            concurrency: 8,
        }
    }

    /// Build a collector talking to the configured rTorrent endpoint.
    pub fn from_config(config: &Config) -> Result<Self, GcError> {
        let client = RtorrentClient::from_config(config)?;
        let rules = RuleSet::compile(&config.rules)?;
        Ok(Self::new(Arc::new(client), config.data_dirs.clone(), rules)
            .with_fail_past_threshold(config.fail_past_threshold)
            .with_concurrency(config.scan.concurrency))
    }

    pub fn with_fail_past_threshold(mut self, threshold: f64) -> Self {
        self.fail_past_threshold = threshold;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn directory(&self) -> &Arc<dyn TorrentDirectory> {
        &self.directory
    }

    /// Classify every download and find orphaned paths.
    ///
    /// Non-healthy downloads are reported at their base path with the
    /// record attached. Orphans that are some live download's base path
    /// are dropped. Base paths are compared as seen under the configured
    /// data directories, whichever form the daemon reports.
    pub async fn scan(&self) -> Result<ScanReport, GcError> {
        let started = Instant::now();
        let roots = DataRoots::resolve(&self.roots).await?;
        let records = roots.normalize_records(&self.directory.list_records().await?)?;
        debug!(count = records.len(), backend = self.directory.name(), "Fetched session");

        let flagged: Vec<(ProblemType, _)> = records
            .iter()
            .map(|record| (classify(record, &self.rules), record))
            .filter(|(problem, _)| problem.is_problem())
            .collect();

        let mut items: Vec<ProblemItem> = stream::iter(flagged)
            .map(|(problem, record)| async move {
                let usage = disk_usage(&record.base_path).await.map_err(|source| {
                    ReconcileError::Io {
                        path: record.base_path.clone(),
                        source,
                    }
                })?;
                Ok::<_, ReconcileError>(ProblemItem {
                    path: record.base_path.clone(),
                    size: usage.size,
                    problem,
                    torrent: Some(record.clone()),
                    related_torrents: Vec::new(),
                    last_modified: usage.last_modified,
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let live: HashSet<&PathBuf> = records.iter().map(|r| &r.base_path).collect();
        let orphans = scan_orphans(&roots, &records, self.concurrency).await?;
        items.extend(orphans.into_iter().filter(|item| !live.contains(&item.path)));

        for item in &items {
            metrics::PROBLEMS_FOUND
                .with_label_values(&[item.problem.as_str()])
                .inc();
        }
        let report = ScanReport::new(records.len(), items);

        let elapsed = started.elapsed();
        metrics::SCAN_DURATION
            .with_label_values(&[])
            .observe(elapsed.as_secs_f64());
        info!(
            torrents = report.summary.torrents,
            problems = report.summary.total.paths,
            bytes = report.summary.total.size,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scan complete"
        );
        Ok(report)
    }

    pub fn coordinator(&self) -> CleanupCoordinator {
        CleanupCoordinator::new(
            self.roots.clone(),
            self.fail_past_threshold,
            Arc::clone(&self.directory),
        )
    }

    /// Remove `targets` and their downloads.
    pub async fn cleanup(&self, targets: &[PathBuf]) -> Result<CleanupResult, CleanupError> {
        self.coordinator().cleanup(targets).await
    }

    /// Erase downloads by id, subject to the safety threshold. Data on disk
    /// is left alone.
    pub async fn remove_torrents(&self, ids: &[String]) -> Result<RemovalOutcome, TorrentClientError> {
        self.directory.remove_ids(ids, self.fail_past_threshold).await
    }
}
