//! Data models for articles, clusters and the storage record shapes.
//!
//! - [`FetchedArticle`]: raw `(source, title, url, text)` tuple from a fetcher
//! - [`ArticleRecord`]: an eligible article with its embedding, immutable once batched
//! - [`ClusterReport`]: an emitted cluster with overview, title and summarized members
//! - [`ClusterBatch`] and the `*Row` types: what the storage collaborator accepts and returns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder stored whenever an article or cluster summary is unavailable.
pub const NO_SUMMARY: &str = "Not enough content to summarize.";

/// An article as produced by a fetcher, before eligibility filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArticle {
    /// Display name of the outlet, e.g. `"BBC News"`.
    pub source: String,
    pub title: String,
    /// Canonical article URL.
    pub url: String,
    /// Extracted article body.
    pub text: String,
    /// Publication time from the feed, when the feed carried one.
    pub published_at: Option<DateTime<Utc>>,
}

/// Unique key of an article within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleIdentity {
    pub source: String,
    pub title: String,
    pub url: String,
}

/// An eligible article with its embedding.
#[derive(Debug, Clone)]
pub struct ArticleRecord {
    pub identity: ArticleIdentity,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub embedding: Vec<f32>,
}

impl ArticleRecord {
    pub fn new(article: FetchedArticle, embedding: Vec<f32>) -> Self {
        Self {
            identity: ArticleIdentity {
                source: article.source,
                title: article.title,
                url: article.url,
            },
            text: article.text,
            published_at: article.published_at,
            embedding,
        }
    }

    pub fn source(&self) -> &str {
        &self.identity.source
    }

    pub fn title(&self) -> &str {
        &self.identity.title
    }
}

impl FetchedArticle {
    pub fn identity(&self) -> ArticleIdentity {
        ArticleIdentity {
            source: self.source.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
        }
    }
}

/// A cluster member as it appears in the run output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedArticle {
    pub title: String,
    pub source: String,
    pub url: String,
    pub text: String,
    pub article_summary: String,
}

/// An emitted cluster: at least two members, all from distinct sources.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterReport {
    /// Run-local number, 1-based, ordered by the cluster's earliest article.
    pub number: usize,
    pub title: String,
    pub overview: String,
    pub articles: Vec<SummarizedArticle>,
}

/// Cluster shape accepted by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
    pub cluster_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_title: Option<String>,
}

/// Article shape accepted by the storage collaborator inside a batch; the
/// store fills in `cluster_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One cluster plus its articles, written atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBatch {
    pub cluster: NewCluster,
    pub articles: Vec<NewArticle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRow {
    pub cluster_id: i64,
    pub cluster_summary: String,
    #[serde(default)]
    pub cluster_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRow {
    #[serde(alias = "id")]
    pub article_id: i64,
    pub cluster_id: i64,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub article_summary: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Result of writing one [`ClusterBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedBatch {
    pub cluster: ClusterRow,
    #[serde(default)]
    pub articles: Vec<ArticleRow>,
}

/// A cluster with all its stored articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterArticles {
    pub cluster_id: i64,
    pub cluster_summary: String,
    pub articles: Vec<ArticleRow>,
    pub article_count: usize,
}

/// The first group of a bulk write that could not be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    /// Zero-based index of the failing group in the submitted list.
    pub index: usize,
    pub reason: String,
}

/// Outcome of a bulk write: groups stored before the first failure are kept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkOutcome {
    pub results: Vec<CreatedBatch>,
    pub failure: Option<BulkFailure>,
}

impl BulkOutcome {
    pub fn clusters_created(&self) -> usize {
        self.results.len()
    }

    pub fn articles_created(&self) -> usize {
        self.results.iter().map(|r| r.articles.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}
