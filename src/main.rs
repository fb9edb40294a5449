//! # News Clusters
//!
//! Groups news articles about the same event across outlets, summarizes each
//! group with an LLM, and stores the groups with their articles.
//!
//! ## Features
//!
//! - Reads any number of RSS feeds and extracts article text from the linked pages
//! - Embeds articles through an OpenAI-compatible embeddings endpoint
//! - Clusters by cosine similarity: connected components of the threshold graph,
//!   at most one article per outlet, at least two outlets per cluster
//! - Summarizes articles and clusters through `awful_aj` chat templates
//! - Stores clusters in memory or through a REST API, one cluster at a time
//! - Runs once or on a fixed schedule
//!
//! ## Usage
//!
//! ```sh
//! news_clusters -c clusters.yaml run
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: index feeds, download recent article pages
//! 2. **Filtering**: drop short, stale, repeated and already stored articles
//! 3. **Clustering**: embed, build the similarity index, group
//! 4. **Summarizing**: article summaries, then cluster overviews and titles
//! 5. **Output**: write the run JSON, then persist cluster by cluster

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod cluster;
mod config;
mod embedding;
mod error;
mod models;
mod outputs;
mod pipeline;
mod schedule;
mod scrapers;
mod similarity;
mod store;
mod summarizer;
mod utils;

use cli::{Cli, Command};
use config::{PipelineConfig, StorageBackend};
use embedding::HttpEmbedder;
use outputs::read_run_output;
use pipeline::{Pipeline, PipelineSettings, persist};
use scrapers::RssFetcher;
use store::{StorageClient, Store};
use summarizer::LlmSummarizer;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_clusters starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = load_config(&args).await?;

    // Early check: ensure JSON output dir is writable
    if let Some(dir) = &config.output.json_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir.display(),
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    match args.command() {
        Command::Run { .. } => config.require_durable_run()?,
        Command::Upload { .. } => config.require_shared_store("upload")?,
        Command::Clusters { .. } => config.require_shared_store("clusters")?,
        Command::Articles { .. } => config.require_shared_store("articles")?,
    }

    let store = StorageClient::from_config(&config.storage)?;

    match args.command() {
        Command::Upload { file, from_group } => {
            let output = read_run_output(&file).await?;
            let batches = output.to_batches();
            info!(path = %file.display(), groups = batches.len(), from_group, "Uploading saved run");
            let outcome = persist(&store, &batches, from_group).await;
            info!(
                clusters = outcome.clusters_created(),
                articles = outcome.articles_created(),
                "Upload finished"
            );
            if let Some(failure) = outcome.failure {
                return Err(format!(
                    "group {} failed: {} (retry with --from-group {})",
                    failure.index, failure.reason, failure.index
                )
                .into());
            }
        }
        Command::Clusters { id, articles } => {
            let json = match (id, articles) {
                (Some(id), true) => serde_json::to_string_pretty(&store.cluster_articles(id).await?)?,
                (Some(id), false) => serde_json::to_string_pretty(&store.get_cluster(id).await?)?,
                (None, _) => serde_json::to_string_pretty(&store.list_clusters().await?)?,
            };
            println!("{json}");
        }
        Command::Articles { id } => {
            let json = match id {
                Some(id) => serde_json::to_string_pretty(&store.get_article(id).await?)?,
                None => serde_json::to_string_pretty(&store.list_articles().await?)?,
            };
            println!("{json}");
        }
        Command::Run { every_minutes } => {
            let fetcher = RssFetcher::new(config.feeds.clone(), config.workers.fetch)?;
            let embedder = HttpEmbedder::new(&config.embedding)?;
            let summarizer = LlmSummarizer::load(&config.summarizer).await?;
            let pipeline = Pipeline::new(
                fetcher,
                embedder,
                summarizer,
                store,
                PipelineSettings::from(&config),
            )?;

            match every_minutes {
                Some(minutes) => {
                    let state =
                        schedule::run_every(&pipeline, Duration::from_secs(minutes.saturating_mul(60))).await;
                    info!(runs = state.runs, failures = state.failures, "Stopped");
                }
                None => {
                    let report = schedule::run_once(&pipeline).await?;
                    if let Some(path) = &report.output_path {
                        info!(path = %path.display(), "Run output saved");
                    }
                    if let Some(failure) = &report.persisted.failure {
                        return Err(format!(
                            "stored {} of {} clusters; group {} failed: {}",
                            report.persisted.clusters_created(),
                            report.clusters.len(),
                            failure.index,
                            failure.reason
                        )
                        .into());
                    }
                }
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Load the YAML config (or defaults) and apply command-line overrides.
async fn load_config(args: &Cli) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).await?,
        None => {
            info!("No config file given; using defaults");
            PipelineConfig::default()
        }
    };

    if let Some(url) = &args.storage_url {
        config.storage.backend = StorageBackend::Rest;
        config.storage.url = Some(url.clone());
    }
    if let Some(dir) = &args.json_output_dir {
        config.output.json_dir = Some(dir.clone());
    }
    config.validate()?;

    if config.feeds.is_empty() && matches!(args.command(), Command::Run { .. }) {
        info!("No feeds configured; runs will find nothing to cluster");
    }
    Ok(config)
}
