//! Prometheus metrics for the garbage collector.
//!
//! This module provides metrics for:
//! - RPC traffic to the torrent daemon
//! - Torrent removal and erase confirmation
//! - Scans (duration, problems found)
//! - Disk cleanup (paths and bytes removed)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// =============================================================================
// RPC
// =============================================================================

/// RPC calls total by method and result.
pub static RPC_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rtgc_rpc_calls_total", "Total RPC calls to the torrent daemon"),
        &["method", "result"], // result: "ok", "error"
    )
    .unwrap()
});

// =============================================================================
// Torrent removal
// =============================================================================

/// Torrents submitted for erase.
pub static TORRENTS_ERASED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("rtgc_torrents_erased_total", "Total torrents submitted for erase").unwrap()
});

/// Erase confirmation outcomes.
pub static ERASE_CONFIRMATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "rtgc_erase_confirmations_total",
            "Erase batches by confirmation outcome",
        ),
        &["outcome"], // "confirmed", "unconfirmed"
    )
    .unwrap()
});

/// Removal requests refused by the safety threshold.
pub static THRESHOLD_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "rtgc_threshold_rejections_total",
        "Removal requests refused by the safety threshold",
    )
    .unwrap()
});

// =============================================================================
// Scans
// =============================================================================

/// Problem items found by type.
pub static PROBLEMS_FOUND: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rtgc_problems_found_total", "Problem items found by scans"),
        &["type"],
    )
    .unwrap()
});

/// Scan duration in seconds.
pub static SCAN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("rtgc_scan_duration_seconds", "Duration of full scans")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Cleanup
// =============================================================================

/// Paths deleted from disk.
pub static PATHS_REMOVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("rtgc_paths_removed_total", "Total paths deleted from disk").unwrap()
});

/// Bytes deleted from disk.
pub static BYTES_REMOVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("rtgc_bytes_removed_total", "Total bytes deleted from disk").unwrap()
});

/// Cleanup targets that failed.
pub static TARGET_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "rtgc_cleanup_target_failures_total",
        "Cleanup targets skipped after an erase or delete failure",
    )
    .unwrap()
});

// =============================================================================
// Helpers
// =============================================================================

pub fn record_rpc_call(method: &str, ok: bool) {
    RPC_CALLS
        .with_label_values(&[method, if ok { "ok" } else { "error" }])
        .inc();
}

/// All collectors, for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(RPC_CALLS.clone()),
        Box::new(TORRENTS_ERASED.clone()),
        Box::new(ERASE_CONFIRMATIONS.clone()),
        Box::new(THRESHOLD_REJECTIONS.clone()),
        Box::new(PROBLEMS_FOUND.clone()),
        Box::new(SCAN_DURATION.clone()),
        Box::new(PATHS_REMOVED.clone()),
        Box::new(BYTES_REMOVED.clone()),
        Box::new(TARGET_FAILURES.clone()),
    ]
}

/// Register every collector with `registry`.
pub fn register_all(registry: &Registry) -> Result<(), prometheus::Error> {
    for collector in all_metrics() {
        registry.register(collector)?;
    }
    Ok(())
}
