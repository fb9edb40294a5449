//! In-memory storage backend.

use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::Store;
use crate::error::StoreError;
use crate::models::{ArticleRow, ClusterArticles, ClusterBatch, ClusterRow, CreatedBatch};

#[derive(Debug, Default)]
struct Tables {
    clusters: BTreeMap<i64, ClusterRow>,
    articles: BTreeMap<i64, ArticleRow>,
    titles: HashSet<String>,
    last_cluster_id: i64,
    last_article_id: i64,
}

impl Tables {
    /// Reject the whole batch before anything is inserted.
    fn validate(&self, batch: &ClusterBatch) -> Result<(), StoreError> {
        if batch.cluster.cluster_summary.trim().is_empty() {
            return Err(StoreError::InvalidRecord("cluster_summary is required".to_string()));
        }
        if let Some(id) = batch.cluster.cluster_id {
            if self.clusters.contains_key(&id) {
                return Err(StoreError::InvalidRecord(format!("cluster {id} already exists")));
            }
        }
        let mut seen = HashSet::new();
        for article in &batch.articles {
            if article.title.trim().is_empty() || article.text.trim().is_empty() {
                return Err(StoreError::InvalidRecord(
                    "article title and text are required".to_string(),
                ));
            }
            if self.titles.contains(&article.title) || !seen.insert(article.title.as_str()) {
                return Err(StoreError::DuplicateTitle(article.title.clone()));
            }
        }
        Ok(())
    }

    fn insert(&mut self, batch: &ClusterBatch) -> CreatedBatch {
        let cluster_id = match batch.cluster.cluster_id {
            Some(id) => id,
            None => self.last_cluster_id + 1,
        };
        self.last_cluster_id = self.last_cluster_id.max(cluster_id);

        let cluster = ClusterRow {
            cluster_id,
            cluster_summary: batch.cluster.cluster_summary.clone(),
            cluster_title: batch.cluster.cluster_title.clone(),
        };
        self.clusters.insert(cluster_id, cluster.clone());

        let articles = batch
            .articles
            .iter()
            .map(|a| {
                self.last_article_id += 1;
                let row = ArticleRow {
                    article_id: self.last_article_id,
                    cluster_id,
                    title: a.title.clone(),
                    text: a.text.clone(),
                    article_summary: a.article_summary.clone(),
                    source: a.source.clone(),
                };
                self.titles.insert(row.title.clone());
                self.articles.insert(row.article_id, row.clone());
                row
            })
            .collect();

        CreatedBatch { cluster, articles }
    }
}

/// Tables held behind a single lock, so each batch is written atomically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Store for MemoryStore {
    async fn title_exists(&self, title: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.titles.contains(title))
    }

    #[instrument(level = "debug", skip_all, fields(articles = batch.articles.len()))]
    async fn create_cluster_batch(&self, batch: &ClusterBatch) -> Result<CreatedBatch, StoreError> {
        let mut tables = self.tables.write().await;
        tables.validate(batch)?;
        let created = tables.insert(batch);
        debug!(cluster_id = created.cluster.cluster_id, "Stored cluster batch");
        Ok(created)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRow>, StoreError> {
        Ok(self.tables.read().await.clusters.values().cloned().collect())
    }

    async fn get_cluster(&self, cluster_id: i64) -> Result<ClusterRow, StoreError> {
        self.tables
            .read()
            .await
            .clusters
            .get(&cluster_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "cluster",
                id: cluster_id,
            })
    }

    async fn list_articles(&self) -> Result<Vec<ArticleRow>, StoreError> {
        Ok(self.tables.read().await.articles.values().cloned().collect())
    }

    async fn get_article(&self, article_id: i64) -> Result<ArticleRow, StoreError> {
        self.tables
            .read()
            .await
            .articles
            .get(&article_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "article",
                id: article_id,
            })
    }

    async fn cluster_articles(&self, cluster_id: i64) -> Result<ClusterArticles, StoreError> {
        let tables = self.tables.read().await;
        let cluster = tables.clusters.get(&cluster_id).ok_or(StoreError::NotFound {
            kind: "cluster",
            id: cluster_id,
        })?;
        let articles: Vec<ArticleRow> = tables
            .articles
            .values()
            .filter(|a| a.cluster_id == cluster_id)
            .cloned()
            .collect();
        Ok(ClusterArticles {
            cluster_id,
            cluster_summary: cluster.cluster_summary.clone(),
            article_count: articles.len(),
            articles,
        })
    }
}
