//! Running the pipeline once or on a fixed period.
//!
//! The loop keeps the only cross-run state: the start time of the last run
//! whose clusters were all stored. That timestamp becomes the next run's
//! `since`, so a failed or partial run is retried over the same window.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, instrument, warn};

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, RunReport};
use crate::scrapers::Fetcher;
use crate::store::Store;
use crate::summarizer::Summarizer;

/// Counters kept by the periodic loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    pub runs: usize,
    pub failures: usize,
    pub last_success: Option<DateTime<Utc>>,
}

pub async fn run_once<F, E, S, St>(
    pipeline: &Pipeline<F, E, S, St>,
) -> Result<RunReport, PipelineError>
where
    F: Fetcher,
    E: Embedder,
    S: Summarizer,
    St: Store,
{
    let report = pipeline.run(None).await?;
    if let Some(failure) = &report.persisted.failure {
        warn!(
            index = failure.index,
            reason = %failure.reason,
            "Run stored only part of its clusters"
        );
    }
    Ok(report)
}

/// Run every `period` until Ctrl-C.
pub async fn run_every<F, E, S, St>(pipeline: &Pipeline<F, E, S, St>, period: Duration) -> ScheduleState
where
    F: Fetcher,
    E: Embedder,
    S: Summarizer,
    St: Store,
{
    run_until(pipeline, period, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run every `period` until `shutdown` resolves.
///
/// A run still in flight when `shutdown` resolves is dropped; storage then
/// holds whatever whole clusters it had written.
#[instrument(level = "info", skip_all, fields(period_secs = period.as_secs()))]
pub async fn run_until<F, E, S, St>(
    pipeline: &Pipeline<F, E, S, St>,
    period: Duration,
    shutdown: impl Future<Output = ()>,
) -> ScheduleState
where
    F: Fetcher,
    E: Embedder,
    S: Summarizer,
    St: Store,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = ScheduleState::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        let started = Utc::now();
        let result = tokio::select! {
            result = pipeline.run(state.last_success) => result,
            _ = &mut shutdown => {
                warn!("Shutdown requested during a run");
                break;
            }
        };
        state.runs += 1;

        match result {
            Ok(report) if report.succeeded() => {
                state.last_success = Some(started);
                info!(clusters = report.clusters.len(), "Scheduled run succeeded");
            }
            Ok(report) => {
                state.failures += 1;
                warn!(
                    stored = report.persisted.clusters_created(),
                    emitted = report.clusters.len(),
                    "Scheduled run stored only part of its clusters"
                );
            }
            Err(e) => {
                state.failures += 1;
                error!(error = %e, "Scheduled run failed");
            }
        }
    }

    info!(runs = state.runs, failures = state.failures, "Scheduler stopped");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::embedding::testing::FixedEmbedder;
    use crate::error::StoreError;
    use crate::models::{
        ArticleRow, ClusterArticles, ClusterBatch, ClusterRow, CreatedBatch, FetchedArticle,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::pipeline::PipelineSettings;
    use crate::scrapers::testing::StaticFetcher;
    use crate::store::MemoryStore;
    use crate::summarizer::testing::EchoSummarizer;

    fn pair() -> (StaticFetcher, FixedEmbedder) {
        let articles: Vec<FetchedArticle> = ["BBC", "NPR"]
            .iter()
            .map(|s| FetchedArticle {
                source: s.to_string(),
                title: format!("{s} covers the storm"),
                url: format!("https://{s}.example/storm"),
                text: format!("{s} storm coverage. ").repeat(10),
                published_at: None,
            })
            .collect();
        let vectors = articles
            .iter()
            .map(|a| (a.text.clone(), vec![1.0, 0.1]))
            .collect();
        (StaticFetcher { articles }, FixedEmbedder { vectors })
    }

    /// Two stories, each covered by two outlets.
    fn two_stories() -> (StaticFetcher, FixedEmbedder) {
        let stories = [
            ("BBC", "Storm floods the coast", [1.0, 0.0]),
            ("NPR", "Coastal storm brings floods", [0.98, 0.05]),
            ("AP", "Markets rally on rate cut", [0.0, 1.0]),
            ("Reuters", "Stocks climb after rate cut", [0.05, 0.97]),
        ];
        let articles: Vec<FetchedArticle> = stories
            .iter()
            .map(|(s, title, _)| FetchedArticle {
                source: s.to_string(),
                title: title.to_string(),
                url: format!("https://{s}.example/{}", title.len()),
                text: format!("{title}. ").repeat(8),
                published_at: None,
            })
            .collect();
        let vectors = articles
            .iter()
            .zip(stories.iter())
            .map(|(a, (_, _, v))| (a.text.clone(), v.to_vec()))
            .collect();
        (StaticFetcher { articles }, FixedEmbedder { vectors })
    }

    /// Stores the first `allowed` cluster groups, then rejects every write.
    struct FillingStore {
        inner: MemoryStore,
        allowed: AtomicUsize,
    }

    impl FillingStore {
        fn new(allowed: usize) -> Self {
            Self {
                inner: MemoryStore::default(),
                allowed: AtomicUsize::new(allowed),
            }
        }
    }

    impl Store for FillingStore {
        async fn title_exists(&self, title: &str) -> Result<bool, StoreError> {
            self.inner.title_exists(title).await
        }

        async fn create_cluster_batch(&self, batch: &ClusterBatch) -> Result<CreatedBatch, StoreError> {
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::Api {
                    status: 507,
                    body: "storage full".to_string(),
                });
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.create_cluster_batch(batch).await
        }

        async fn list_clusters(&self) -> Result<Vec<ClusterRow>, StoreError> {
            self.inner.list_clusters().await
        }

        async fn get_cluster(&self, cluster_id: i64) -> Result<ClusterRow, StoreError> {
            self.inner.get_cluster(cluster_id).await
        }

        async fn list_articles(&self) -> Result<Vec<ArticleRow>, StoreError> {
            self.inner.list_articles().await
        }

        async fn get_article(&self, article_id: i64) -> Result<ArticleRow, StoreError> {
            self.inner.get_article(article_id).await
        }

        async fn cluster_articles(&self, cluster_id: i64) -> Result<ClusterArticles, StoreError> {
            self.inner.cluster_articles(cluster_id).await
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings::from(&PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_run_once() {
        let (fetcher, embedder) = pair();
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();
        let report = run_once(&pipeline).await.unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert!(report.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_advance_last_success() {
        let (fetcher, embedder) = pair();
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();

        let period = Duration::from_secs(600);
        let state = run_until(&pipeline, period, tokio::time::sleep(Duration::from_secs(1500))).await;

        assert_eq!(state.runs, 3);
        assert_eq!(state.failures, 0);
        assert!(state.last_success.is_some());
        // Later runs find the titles already stored.
        assert_eq!(pipeline.store().list_clusters().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_runs_keep_last_success_unset() {
        let (fetcher, _) = pair();
        let pipeline = Pipeline::new(
            fetcher,
            FixedEmbedder::default(),
            EchoSummarizer::default(),
            MemoryStore::default(),
            settings(),
        )
        .unwrap();

        let period = Duration::from_secs(60);
        let state = run_until(&pipeline, period, tokio::time::sleep(Duration::from_secs(90))).await;

        assert_eq!(state.runs, 2);
        assert_eq!(state.failures, 2);
        assert_eq!(state.last_success, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_runs_keep_last_success_unset() {
        let (fetcher, embedder) = two_stories();
        let pipeline = Pipeline::new(
            fetcher,
            embedder,
            EchoSummarizer::default(),
            FillingStore::new(1),
            settings(),
        )
        .unwrap();

        let period = Duration::from_secs(60);
        let state = run_until(&pipeline, period, tokio::time::sleep(Duration::from_secs(90))).await;

        assert_eq!(state.runs, 2);
        assert_eq!(state.failures, 2);
        assert_eq!(state.last_success, None);
        // Only the first group of the first run made it.
        assert_eq!(pipeline.store().inner.list_clusters().await.unwrap().len(), 1);
    }
}
