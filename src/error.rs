//! Error types for every stage of the clustering pipeline.
//!
//! Each stage owns one enum so callers can tell the recoverable cases
//! (summarization degradation, not-found lookups) from the fatal ones
//! (malformed embedding input, embedding provider failure).

use std::time::Duration;
use thiserror::Error;

/// Malformed input handed to the similarity index or the cluster builder.
///
/// These are input-contract violations and abort the current run before
/// anything is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("embedding batch is empty")]
    EmptyBatch,
    #[error("embedding {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("embedding {index} has zero or non-finite norm")]
    DegenerateVector { index: usize },
    #[error("{articles} articles but {vectors} embeddings")]
    LengthMismatch { articles: usize, vectors: usize },
    #[error("similarity threshold {0} is outside [-1, 1]")]
    InvalidThreshold(f32),
}

/// Why a summary could not be produced.
///
/// Never fatal: converted to a placeholder or fallback string at the
/// boundary, see [`crate::summarizer::or_placeholder`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummaryError {
    #[error("text has {chars} characters, need at least {min}")]
    InsufficientContent { chars: usize, min: usize },
    #[error("summarizer timed out after {0:?}")]
    Timeout(Duration),
    #[error("summarizer failed: {0}")]
    Collaborator(String),
}

impl SummaryError {
    /// `true` when the collaborator was asked and failed, as opposed to the
    /// text being too short to ask about.
    pub fn is_collaborator_failure(&self) -> bool {
        !matches!(self, SummaryError::InsufficientContent { .. })
    }
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid embedding response: {0}")]
    Malformed(String),
    #[error("embedding provider returned {found} vectors for {expected} texts")]
    CountMismatch { expected: usize, found: usize },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("article title already stored: {0}")]
    DuplicateTitle(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unparseable feed: {0}")]
    Feed(#[from] quick_xml::DeError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot load summarizer: {0}")]
    Summarizer(String),
}

/// Fatal run errors. Anything here aborts the run before persistence.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot write run output: {0}")]
    Output(#[from] std::io::Error),
    #[error("cannot encode run output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_display() {
        let e = ClusterError::DimensionMismatch {
            index: 3,
            expected: 384,
            found: 768,
        };
        assert_eq!(e.to_string(), "embedding 3 has dimension 768, expected 384");
    }

    #[test]
    fn test_summary_error_kinds() {
        let short = SummaryError::InsufficientContent { chars: 12, min: 100 };
        assert!(!short.is_collaborator_failure());
        assert!(SummaryError::Timeout(Duration::from_secs(5)).is_collaborator_failure());
        assert!(SummaryError::Collaborator("502".into()).is_collaborator_failure());
    }

    #[test]
    fn test_store_not_found_display() {
        let e = StoreError::NotFound {
            kind: "cluster",
            id: 99999,
        };
        assert!(e.is_not_found());
        assert_eq!(e.to_string(), "cluster 99999 not found");
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let e: PipelineError = ClusterError::EmptyBatch.into();
        assert_eq!(e.to_string(), "embedding batch is empty");
    }
}
