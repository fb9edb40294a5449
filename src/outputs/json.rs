//! JSON run output.
//!
//! The document is keyed by run-local cluster number:
//!
//! ```json
//! {
//!   "1": {
//!     "cluster_name": "Storm Hits Coast",
//!     "cluster_summary": "…",
//!     "articles": [{"title": "…", "source": "…", "url": "…", "text": "…", "article_summary": "…"}]
//!   }
//! }
//! ```
//!
//! Files are written to `{json_output_dir}/{YYYY-MM-DD}/{HHMMSS}.json` through a
//! temporary file and a rename, so a reader never sees a half-written run.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

use crate::error::PipelineError;
use crate::models::{ClusterBatch, ClusterReport, NewArticle, NewCluster, SummarizedArticle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArticle {
    pub title: String,
    pub source: String,
    pub url: String,
    pub text: String,
    pub article_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCluster {
    pub cluster_name: String,
    pub cluster_summary: String,
    pub articles: Vec<OutputArticle>,
}

/// Emitted clusters of one run, keyed by cluster number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunOutput {
    pub clusters: BTreeMap<usize, OutputCluster>,
}

impl From<SummarizedArticle> for OutputArticle {
    fn from(a: SummarizedArticle) -> Self {
        Self {
            title: a.title,
            source: a.source,
            url: a.url,
            text: a.text,
            article_summary: a.article_summary,
        }
    }
}

impl RunOutput {
    pub fn from_reports(reports: &[ClusterReport]) -> Self {
        let clusters = reports
            .iter()
            .map(|r| {
                let cluster = OutputCluster {
                    cluster_name: r.title.clone(),
                    cluster_summary: r.overview.clone(),
                    articles: r.articles.iter().cloned().map(OutputArticle::from).collect(),
                };
                (r.number, cluster)
            })
            .collect();
        Self { clusters }
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Split into one storage batch per cluster, in cluster-number order.
    ///
    /// Cluster ids are left to the store; the run-local number is not an id.
    pub fn to_batches(&self) -> Vec<ClusterBatch> {
        self.clusters
            .values()
            .map(|c| ClusterBatch {
                cluster: NewCluster {
                    cluster_id: None,
                    cluster_summary: c.cluster_summary.clone(),
                    cluster_title: Some(c.cluster_name.clone()),
                },
                articles: c
                    .articles
                    .iter()
                    .map(|a| NewArticle {
                        title: a.title.clone(),
                        text: a.text.clone(),
                        article_summary: Some(a.article_summary.clone()),
                        source: Some(a.source.clone()),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Write `output` under `json_output_dir`, returning the final path.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir.display()))]
pub async fn write_run_output(
    output: &RunOutput,
    json_output_dir: &Path,
    at: DateTime<Local>,
) -> Result<PathBuf, PipelineError> {
    let json = serde_json::to_string_pretty(output)?;

    let full_json_dir = json_output_dir.join(at.format("%Y-%m-%d").to_string());
    info!(full_json_dir = %full_json_dir.display(), "Ensuring JSON directory exists");
    if let Err(e) = fs::create_dir_all(&full_json_dir).await {
        error!(full_json_dir = %full_json_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let stem = at.format("%H%M%S").to_string();
    let path = full_json_dir.join(format!("{stem}.json"));
    let tmp = full_json_dir.join(format!(".{stem}.json.tmp"));

    fs::write(&tmp, json).await?;
    if let Err(e) = fs::rename(&tmp, &path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    info!(path = %path.display(), clusters = output.clusters.len(), "Wrote run output");
    Ok(path)
}

#[instrument(level = "info", fields(path = %path.display()))]
pub async fn read_run_output(path: &Path) -> Result<RunOutput, PipelineError> {
    let json = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}
