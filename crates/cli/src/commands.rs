use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rtgc_core::ProblemType;

#[derive(Debug, Parser)]
#[command(name = "rtgc", version)]
#[command(about = "Finds and removes dead rTorrent downloads and orphaned data", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, env = "RTGC_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of text
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print metrics in Prometheus text format to stderr on exit
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify every download and find orphaned paths
    Scan {
        /// Only report these problem types
        #[arg(short = 't', long = "type")]
        types: Vec<ProblemType>,
    },
    /// Erase downloads and delete their data. Dry run unless --execute
    Cleanup {
        /// Paths to remove
        paths: Vec<PathBuf>,
        /// Also remove every path a fresh scan reports with these types
        #[arg(short = 't', long = "type")]
        types: Vec<ProblemType>,
        /// Actually remove
        #[arg(long)]
        execute: bool,
    },
    /// Erase downloads by id, leaving their data on disk
    RemoveTorrents {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print the effective configuration, password redacted
    Config,
}
