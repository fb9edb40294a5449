//! REST storage backend.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | one cluster batch | `POST /api/clusters/batch` |
//! | bulk batches | `POST /api/data/bulk` with `{"clusters": [...]}` |
//! | clusters | `GET /api/clusters`, `GET /api/clusters/{id}` |
//! | articles | `GET /api/articles`, `GET /api/articles/{id}` |
//! | cluster articles | `GET /api/clusters/{id}/articles` |
//! | title lookup | `GET /api/articles/title/{title}` |

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use url::Url;

use super::Store;
use crate::error::StoreError;
use crate::models::{
    ArticleRow, BulkFailure, BulkOutcome, ClusterArticles, ClusterBatch, ClusterRow, CreatedBatch,
};
use crate::utils::truncate_for_log;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base: Url,
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    clusters: &'a [ClusterBatch],
}

impl RestStore {
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| StoreError::InvalidRecord(format!("storage url {base_url}: {e}")))?;
        // Relative joins replace the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base
            .join(path)
            .map_err(|e| StoreError::InvalidRecord(format!("endpoint {path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        id: Option<i64>,
    ) -> Result<T, StoreError> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(StoreError::NotFound { kind, id });
            }
        }
        let body = response.text().await?;
        decode(status, &body)
    }
}

/// Decode a successful body, or turn an error status into [`StoreError::Api`].
fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, StoreError> {
    if !status.is_success() {
        return Err(StoreError::Api {
            status: status.as_u16(),
            body: truncate_for_log(body, 500),
        });
    }
    serde_json::from_str(body)
        .map_err(|e| StoreError::InvalidRecord(format!("unexpected response: {e}")))
}

/// Interpret a `/api/data/bulk` response.
///
/// Success carries `results`; failure carries `error` and the groups stored
/// before it in `partial_results`, so the failing index is their count.
fn bulk_outcome(status: StatusCode, body: &str) -> BulkOutcome {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let parse_list = |key: &str| -> Vec<CreatedBatch> {
        value
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    };

    if status.is_success() {
        return BulkOutcome {
            results: parse_list("results"),
            failure: None,
        };
    }

    let results = parse_list("partial_results");
    let reason = value
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), truncate_for_log(body, 200)));
    BulkOutcome {
        failure: Some(BulkFailure {
            index: results.len(),
            reason,
        }),
        results,
    }
}

impl Store for RestStore {
    #[instrument(level = "debug", skip(self))]
    async fn title_exists(&self, title: &str) -> Result<bool, StoreError> {
        let path = format!("api/articles/title/{}", urlencoding::encode(title));
        let response = self.client.get(self.endpoint(&path)?).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(StoreError::Api {
                status: s.as_u16(),
                body: truncate_for_log(&response.text().await.unwrap_or_default(), 500),
            }),
        }
    }

    #[instrument(level = "info", skip_all, fields(articles = batch.articles.len()))]
    async fn create_cluster_batch(&self, batch: &ClusterBatch) -> Result<CreatedBatch, StoreError> {
        let response = self
            .client
            .post(self.endpoint("api/clusters/batch")?)
            .json(batch)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        decode(status, &body)
    }

    #[instrument(level = "info", skip_all, fields(groups = batches.len()))]
    async fn bulk_create(&self, batches: &[ClusterBatch]) -> BulkOutcome {
        let url = match self.endpoint("api/data/bulk") {
            Ok(url) => url,
            Err(e) => {
                return BulkOutcome {
                    results: Vec::new(),
                    failure: Some(BulkFailure {
                        index: 0,
                        reason: e.to_string(),
                    }),
                };
            }
        };
        let sent = self
            .client
            .post(url)
            .json(&BulkRequest { clusters: batches })
            .send()
            .await;
        let outcome = match sent {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bulk_outcome(status, &body)
            }
            Err(e) => BulkOutcome {
                results: Vec::new(),
                failure: Some(BulkFailure {
                    index: 0,
                    reason: e.to_string(),
                }),
            },
        };
        match &outcome.failure {
            None => info!(
                clusters = outcome.clusters_created(),
                articles = outcome.articles_created(),
                "Bulk upload succeeded"
            ),
            Some(f) => error!(index = f.index, reason = %f.reason, "Bulk upload failed"),
        }
        outcome
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterRow>, StoreError> {
        self.get_json("api/clusters", "cluster", None).await
    }

    async fn get_cluster(&self, cluster_id: i64) -> Result<ClusterRow, StoreError> {
        self.get_json(&format!("api/clusters/{cluster_id}"), "cluster", Some(cluster_id))
            .await
    }

    async fn list_articles(&self) -> Result<Vec<ArticleRow>, StoreError> {
        self.get_json("api/articles", "article", None).await
    }

    async fn get_article(&self, article_id: i64) -> Result<ArticleRow, StoreError> {
        self.get_json(&format!("api/articles/{article_id}"), "article", Some(article_id))
            .await
    }

    async fn cluster_articles(&self, cluster_id: i64) -> Result<ClusterArticles, StoreError> {
        self.get_json(
            &format!("api/clusters/{cluster_id}/articles"),
            "cluster",
            Some(cluster_id),
        )
        .await
    }
}
