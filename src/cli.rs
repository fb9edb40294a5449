//! Command-line interface definitions for News Clusters.
//!
//! Flags override the matching settings of the YAML config; the storage URL
//! can also come from the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the News Clusters application.
///
/// # Examples
///
/// ```sh
/// # One run with the default config
/// news_clusters run
///
/// # Every 30 minutes, storing into the REST API and keeping run files
/// STORAGE_API_URL=http://localhost:5000 news_clusters -c clusters.yaml -j ./runs run --every-minutes 30
///
/// # Re-upload a saved run, starting at the group that failed
/// news_clusters upload ./runs/2025-05-06/080000.json --from-group 2
///
/// # Inspect what is stored
/// news_clusters clusters 3 --articles
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the pipeline config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the storage REST API; selects the REST backend
    #[arg(long, env = "STORAGE_API_URL", global = true)]
    pub storage_url: Option<String>,

    /// Directory for per-run JSON output
    #[arg(short, long, global = true)]
    pub json_output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Longest accepted run period: one year.
pub const MAX_EVERY_MINUTES: u64 = 60 * 24 * 365;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch, cluster, summarize and store (the default)
    Run {
        /// Keep running, once every N minutes, until Ctrl-C
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_EVERY_MINUTES))]
        every_minutes: Option<u64>,
    },
    /// Store the clusters of a saved run output file
    Upload {
        /// Run output JSON written by an earlier run
        file: PathBuf,

        /// Zero-based group to start from, as reported by a failed upload
        #[arg(long, default_value_t = 0)]
        from_group: usize,
    },
    /// Print stored clusters as JSON, or one cluster
    Clusters {
        id: Option<i64>,

        /// With an id, include the cluster's articles
        #[arg(long)]
        articles: bool,
    },
    /// Print stored articles as JSON, or one article
    Articles {
        id: Option<i64>,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { every_minutes: None })
    }
}
