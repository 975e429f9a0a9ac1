pub mod classify;
pub mod cleanup;
pub mod config;
pub mod gc;
pub mod metrics;
pub mod problem;
pub mod reconcile;
pub mod rpc;
pub mod testing;
pub mod torrent_client;

pub use classify::{classify, classify_message, default_rules, Rule, RuleError, RuleMatcher, RuleSet};
pub use cleanup::{CleanupCoordinator, CleanupError, CleanupResult, TargetFailure};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use gc::{GarbageCollector, GcError, ScanReport, ScanSummary, Tally};
pub use problem::{ProblemItem, ProblemType};
pub use reconcile::{disk_usage, scan_orphans, DataRoots, PathUsage, ReconcileError};
pub use rpc::{HttpTransport, MethodCall, RpcError, RpcTransport, Value, ValueExt};
pub use torrent_client::{
    check_removal_threshold, RemovalOutcome, RtorrentClient, TorrentClientError,
    TorrentDirectory, TorrentRecord,
};
