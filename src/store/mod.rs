//! Storage collaborator: where emitted clusters and their articles end up.
//!
//! Two backends share the [`Store`] trait:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | In-memory | [`memory`] | Default; tables live for the process lifetime |
//! | REST | [`rest`] | Talks to the clusters/articles HTTP API |
//!
//! One cluster plus its articles is the unit of atomicity. A bulk write is a
//! sequence of such units and stops at the first one that fails; groups
//! written before the failure stay written.

use tracing::{error, info};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StoreError;
use crate::models::{
    ArticleRow, BulkFailure, BulkOutcome, ClusterArticles, ClusterBatch, ClusterRow, CreatedBatch,
};

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

pub trait Store {
    /// Whether an article with exactly this title is already stored.
    async fn title_exists(&self, title: &str) -> Result<bool, StoreError>;

    /// Create one cluster and all of its articles, or nothing.
    async fn create_cluster_batch(&self, batch: &ClusterBatch) -> Result<CreatedBatch, StoreError>;

    /// Write `batches` in order, stopping at the first failure.
    ///
    /// Earlier groups are kept; later groups are not attempted.
    async fn bulk_create(&self, batches: &[ClusterBatch]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for (index, batch) in batches.iter().enumerate() {
            match self.create_cluster_batch(batch).await {
                Ok(created) => outcome.results.push(created),
                Err(e) => {
                    error!(index, error = %e, "Cluster group failed; stopping bulk write");
                    outcome.failure = Some(BulkFailure {
                        index,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        info!(
            groups = batches.len(),
            clusters = outcome.clusters_created(),
            articles = outcome.articles_created(),
            "Bulk write finished"
        );
        outcome
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRow>, StoreError>;

    async fn get_cluster(&self, cluster_id: i64) -> Result<ClusterRow, StoreError>;

    async fn list_articles(&self) -> Result<Vec<ArticleRow>, StoreError>;

    async fn get_article(&self, article_id: i64) -> Result<ArticleRow, StoreError>;

    /// A cluster with its articles; `NotFound` when the cluster is absent.
    async fn cluster_articles(&self, cluster_id: i64) -> Result<ClusterArticles, StoreError>;
}

/// The backend selected by configuration.
#[derive(Debug)]
pub enum StorageClient {
    Memory(MemoryStore),
    Rest(RestStore),
}

impl StorageClient {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        match (config.backend, config.url.as_deref()) {
            (StorageBackend::Memory, _) => Ok(Self::Memory(MemoryStore::default())),
            (StorageBackend::Rest, Some(url)) => Ok(Self::Rest(RestStore::new(url, config.timeout_secs)?)),
            (StorageBackend::Rest, None) => Err(StoreError::InvalidRecord(
                "rest storage needs a base url".to_string(),
            )),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            StorageClient::Memory($store) => $call,
            StorageClient::Rest($store) => $call,
        }
    };
}

impl Store for StorageClient {
    async fn title_exists(&self, title: &str) -> Result<bool, StoreError> {
        dispatch!(self, s => s.title_exists(title).await)
    }

    async fn create_cluster_batch(&self, batch: &ClusterBatch) -> Result<CreatedBatch, StoreError> {
        dispatch!(self, s => s.create_cluster_batch(batch).await)
    }

    async fn bulk_create(&self, batches: &[ClusterBatch]) -> BulkOutcome {
        dispatch!(self, s => s.bulk_create(batches).await)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRow>, StoreError> {
        dispatch!(self, s => s.list_clusters().await)
    }

    async fn get_cluster(&self, cluster_id: i64) -> Result<ClusterRow, StoreError> {
        dispatch!(self, s => s.get_cluster(cluster_id).await)
    }

    async fn list_articles(&self) -> Result<Vec<ArticleRow>, StoreError> {
        dispatch!(self, s => s.list_articles().await)
    }

    async fn get_article(&self, article_id: i64) -> Result<ArticleRow, StoreError> {
        dispatch!(self, s => s.get_article(article_id).await)
    }

    async fn cluster_articles(&self, cluster_id: i64) -> Result<ClusterArticles, StoreError> {
        dispatch!(self, s => s.cluster_articles(cluster_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults_to_memory() {
        let client = StorageClient::from_config(&StorageConfig::default()).unwrap();
        assert!(matches!(client, StorageClient::Memory(_)));
    }

    #[test]
    fn test_from_config_rest() {
        let config = StorageConfig {
            backend: StorageBackend::Rest,
            url: Some("http://localhost:5000".to_string()),
            timeout_secs: None,
        };
        let client = StorageClient::from_config(&config).unwrap();
        assert!(matches!(client, StorageClient::Rest(_)));

        let missing = StorageConfig {
            url: None,
            ..config
        };
        assert!(StorageClient::from_config(&missing).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_reaches_backend() {
        let client = StorageClient::Memory(MemoryStore::default());
        assert!(!client.title_exists("anything").await.unwrap());
        assert!(client.get_cluster(1).await.unwrap_err().is_not_found());
    }
}
