//! One clustering run from fetch to persistence.
//!
//! ```text
//! fetch → filter → dedup → embed → cluster → summarize → write output → persist
//! ```
//!
//! The driver holds no state between runs. Everything a run needs to know
//! about the past arrives as `since` (the last successful run) or is asked of
//! the store (already stored titles).

use chrono::{DateTime, Local, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cluster::{ClusterBuilder, ClusterPlan};
use crate::config::PipelineConfig;
use crate::embedding::Embedder;
use crate::error::{ClusterError, EmbeddingError, PipelineError, SummaryError};
use crate::models::{
    ArticleRecord, BulkFailure, BulkOutcome, ClusterBatch, ClusterReport, FetchedArticle,
    SummarizedArticle,
};
use crate::outputs::{RunOutput, write_run_output};
use crate::scrapers::Fetcher;
use crate::store::Store;
use crate::summarizer::{Summarizer, or_placeholder, summarize_article, summarize_cluster};
use crate::utils::{clip_chars, truncate_for_log};

/// Tunables for one pipeline, taken from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub threshold: f32,
    pub min_text_chars: usize,
    pub max_age: chrono::Duration,
    pub max_input_chars: usize,
    pub summarize_workers: usize,
    pub summary_timeout: Duration,
    pub json_output_dir: Option<PathBuf>,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.clustering.threshold,
            min_text_chars: config.filters.min_text_chars,
            max_age: config.filters.max_age(),
            max_input_chars: config.embedding.max_input_chars,
            summarize_workers: config.workers.summarize.max(1),
            summary_timeout: config.summarizer.timeout(),
            json_output_dir: config.output.json_dir.clone(),
        }
    }
}

/// What a run did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub eligible: usize,
    /// Articles skipped because their title was already stored or seen.
    pub skipped_known: usize,
    pub clusters: Vec<ClusterReport>,
    pub output_path: Option<PathBuf>,
    pub persisted: BulkOutcome,
}

impl RunReport {
    /// True when every emitted cluster was stored.
    pub fn succeeded(&self) -> bool {
        self.persisted.is_complete()
    }
}

pub struct Pipeline<F, E, S, St> {
    fetcher: F,
    embedder: E,
    summarizer: S,
    store: St,
    builder: ClusterBuilder,
    settings: PipelineSettings,
}

impl<F, E, S, St> Pipeline<F, E, S, St>
where
    F: Fetcher,
    E: Embedder,
    S: Summarizer,
    St: Store,
{
    pub fn new(
        fetcher: F,
        embedder: E,
        summarizer: S,
        store: St,
        settings: PipelineSettings,
    ) -> Result<Self, ClusterError> {
        Ok(Self {
            builder: ClusterBuilder::new(settings.threshold)?,
            fetcher,
            embedder,
            summarizer,
            store,
            settings,
        })
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Recency cutoff: the configured max age, or `since` when later.
    pub fn cutoff(&self, now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let by_age = now
            .checked_sub_signed(self.settings.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        since.map_or(by_age, |s| s.max(by_age))
    }

    #[instrument(level = "info", skip_all, fields(since = ?since))]
    pub async fn run(&self, since: Option<DateTime<Utc>>) -> Result<RunReport, PipelineError> {
        let t0 = Instant::now();
        let cutoff = self.cutoff(Utc::now(), since);

        let fetched = self.fetcher.fetch(cutoff).await;
        let mut report = RunReport {
            fetched: fetched.len(),
            ..RunReport::default()
        };

        let recent = self.filter(fetched, cutoff);
        let (fresh, skipped_known) = self.skip_known(recent).await?;
        report.skipped_known = skipped_known;
        report.eligible = fresh.len();
        info!(
            fetched = report.fetched,
            eligible = report.eligible,
            skipped_known,
            %cutoff,
            "Filtered article batch"
        );

        if fresh.is_empty() {
            info!("No eligible articles; nothing to cluster");
            return Ok(report);
        }

        let records = self.embed(fresh).await?;
        let dates = || records.iter().filter_map(|r| r.published_at);
        debug!(
            articles = records.len(),
            oldest = ?dates().min(),
            newest = ?dates().max(),
            "Embedded batch"
        );
        let plans = self.builder.cluster(&records)?;
        info!(
            clusters = plans.len(),
            same_source_dropped = plans.iter().map(|p| p.dropped.len()).sum::<usize>(),
            "Built clusters"
        );

        report.clusters = self.summarize(&records, &plans).await;

        let output = RunOutput::from_reports(&report.clusters);
        if let Some(dir) = &self.settings.json_output_dir {
            report.output_path = Some(write_run_output(&output, dir, Local::now()).await?);
        }

        report.persisted = persist(&self.store, &output.to_batches(), 0).await;
        info!(
            clusters = report.persisted.clusters_created(),
            articles = report.persisted.articles_created(),
            complete = report.succeeded(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// Keep articles with enough text that are not older than `cutoff`,
    /// dropping repeats of the same identity.
    fn filter(&self, fetched: Vec<FetchedArticle>, cutoff: DateTime<Utc>) -> Vec<FetchedArticle> {
        let min = self.settings.min_text_chars;
        fetched
            .into_iter()
            .filter(|a| a.text.trim().chars().count() >= min)
            .filter(|a| a.published_at.is_none_or(|p| p >= cutoff))
            .unique_by(|a| a.identity())
            .collect()
    }

    /// Drop articles whose title is already stored, or already taken by an
    /// earlier article of this batch.
    async fn skip_known(
        &self,
        articles: Vec<FetchedArticle>,
    ) -> Result<(Vec<FetchedArticle>, usize), PipelineError> {
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(articles.len());
        let mut skipped = 0;
        for article in articles {
            if !seen.insert(article.title.clone()) || self.store.title_exists(&article.title).await? {
                debug!(title = %truncate_for_log(&article.title, 80), "Skipping known title");
                skipped += 1;
                continue;
            }
            fresh.push(article);
        }
        Ok((fresh, skipped))
    }

    async fn embed(&self, articles: Vec<FetchedArticle>) -> Result<Vec<ArticleRecord>, PipelineError> {
        let texts: Vec<String> = articles
            .iter()
            .map(|a| clip_chars(&a.text, self.settings.max_input_chars).to_string())
            .collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != articles.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: articles.len(),
                found: vectors.len(),
            }
            .into());
        }
        Ok(articles
            .into_iter()
            .zip(vectors)
            .map(|(a, v)| ArticleRecord::new(a, v))
            .collect())
    }

    /// Member summaries first, then one overview and title per cluster.
    async fn summarize(&self, records: &[ArticleRecord], plans: &[ClusterPlan]) -> Vec<ClusterReport> {
        let workers = self.settings.summarize_workers;
        let limit = self.settings.summary_timeout;
        let min = self.settings.min_text_chars;

        let members: Vec<usize> = plans.iter().flat_map(|p| p.members.iter().copied()).collect();
        let summaries: Vec<String> = stream::iter(members.iter().copied())
            .map(|i| async move {
                let result = summarize_article(&self.summarizer, &records[i].text, min, limit).await;
                if let Err(e) = &result {
                    log_summary_failure(records[i].title(), e);
                }
                or_placeholder(result)
            })
            .buffered(workers)
            .collect()
            .await;

        let mut by_member: HashMap<usize, String> = members.into_iter().zip(summaries).collect();

        let groups: Vec<(&ClusterPlan, Vec<SummarizedArticle>)> = plans
            .iter()
            .map(|plan| {
                let articles = plan
                    .members
                    .iter()
                    .map(|&i| {
                        let r = &records[i];
                        SummarizedArticle {
                            title: r.identity.title.clone(),
                            source: r.identity.source.clone(),
                            url: r.identity.url.clone(),
                            text: r.text.clone(),
                            article_summary: by_member.remove(&i).unwrap_or_default(),
                        }
                    })
                    .collect();
                (plan, articles)
            })
            .collect();

        stream::iter(groups)
            .map(|(plan, articles)| async move {
                let summary = {
                    let member_summaries: Vec<&str> =
                        articles.iter().map(|a| a.article_summary.as_str()).collect();
                    summarize_cluster(&self.summarizer, &member_summaries, limit).await
                };
                debug!(
                    number = plan.number,
                    title = %summary.title,
                    degraded = summary.overview_degraded,
                    title_fallback = summary.title_fallback,
                    "Summarized cluster"
                );
                ClusterReport {
                    number: plan.number,
                    title: summary.title,
                    overview: summary.overview,
                    articles,
                }
            })
            .buffered(workers)
            .collect()
            .await
    }
}

fn log_summary_failure(title: &str, e: &SummaryError) {
    let title = truncate_for_log(title, 80);
    if e.is_collaborator_failure() {
        warn!(%title, error = %e, "Article summary failed; using placeholder");
    } else {
        debug!(%title, error = %e, "Article too short to summarize");
    }
}

/// Bulk-write `batches` starting at position `from`.
///
/// A failure index in the outcome refers to the position in `batches`, so a
/// failed remainder can be retried by passing it back as `from`.
#[instrument(level = "info", skip_all, fields(groups = batches.len(), from = from))]
pub async fn persist<St: Store>(store: &St, batches: &[ClusterBatch], from: usize) -> BulkOutcome {
    let remainder = batches.get(from..).unwrap_or_default();
    if remainder.is_empty() {
        info!("Nothing to persist");
        return BulkOutcome::default();
    }
    let mut outcome = store.bulk_create(remainder).await;
    if let Some(failure) = outcome.failure.take() {
        warn!(
            stored = outcome.clusters_created(),
            failed_group = failure.index + from,
            reason = %failure.reason,
            "Persistence stopped early; later groups were not written"
        );
        outcome.failure = Some(BulkFailure {
            index: failure.index + from,
            reason: failure.reason,
        });
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::FixedEmbedder;
    use crate::models::NO_SUMMARY;
    use crate::scrapers::testing::StaticFetcher;
    use crate::store::MemoryStore;
    use crate::summarizer::fallback_title;
    use crate::summarizer::testing::{EchoSummarizer, FailingSummarizer};
    use std::sync::atomic::Ordering;

    fn settings() -> PipelineSettings {
        PipelineSettings::from(&PipelineConfig::default())
    }

    fn text_for(title: &str) -> String {
        format!("{title} report. ").repeat(12)
    }

    fn article(source: &str, title: &str) -> FetchedArticle {
        FetchedArticle {
            source: source.to_string(),
            title: title.to_string(),
            url: format!("https://{}.example/{}", source.to_lowercase(), title.replace(' ', "-")),
            text: text_for(title),
            published_at: Some(Utc::now() - chrono::Duration::hours(1)),
        }
    }

    /// Storm stories from three outlets and market stories from two.
    fn scenario() -> (StaticFetcher, FixedEmbedder) {
        let rows = [
            ("BBC", "Storm hits coast", [1.0, 0.0, 0.0]),
            ("NPR", "Coastal storm floods towns", [0.95, 0.1, 0.0]),
            ("CNN", "Storm leaves thousands without power", [0.9, 0.2, 0.0]),
            ("AP", "Markets rally on rate cut", [0.0, 0.0, 1.0]),
            ("Reuters", "Stocks surge after rate decision", [0.05, 0.0, 1.0]),
        ];
        let articles = rows.iter().map(|(s, t, _)| article(s, t)).collect();
        let vectors = rows
            .iter()
            .map(|(_, t, v)| (text_for(t), v.to_vec()))
            .collect::<HashMap<_, _>>();
        (StaticFetcher { articles }, FixedEmbedder { vectors })
    }

    #[tokio::test]
    async fn test_run_clusters_and_persists() {
        let (fetcher, embedder) = scenario();
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();

        let report = pipeline.run(None).await.unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.eligible, 5);
        assert_eq!(report.clusters.len(), 2);
        assert!(report.succeeded());

        let storm = &report.clusters[0];
        assert_eq!(storm.number, 1);
        assert_eq!(storm.articles.len(), 3);
        assert_eq!(storm.title, "Storm Hits Coast");
        assert_eq!(storm.overview, "overview of 3 reports");
        assert_eq!(storm.articles[0].article_summary, "summary of Storm hits coast");

        let markets = &report.clusters[1];
        assert_eq!(markets.articles.len(), 2);
        assert_eq!(markets.articles[1].source, "Reuters");

        assert_eq!(report.persisted.clusters_created(), 2);
        assert_eq!(report.persisted.articles_created(), 5);
        let stored = pipeline.store().cluster_articles(1).await.unwrap();
        assert_eq!(stored.article_count, 3);
        assert_eq!(stored.cluster_summary, "overview of 3 reports");
    }

    #[tokio::test]
    async fn test_failing_summarizer_degrades_gracefully() {
        let (fetcher, embedder) = scenario();
        let pipeline = Pipeline::new(
            fetcher,
            embedder,
            FailingSummarizer::default(),
            MemoryStore::default(),
            settings(),
        )
        .unwrap();

        let report = pipeline.run(None).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.clusters.len(), 2);
        for cluster in &report.clusters {
            assert_eq!(cluster.overview, NO_SUMMARY);
            assert_eq!(cluster.title, fallback_title(NO_SUMMARY));
            assert!(cluster.articles.iter().all(|a| a.article_summary == NO_SUMMARY));
        }
        // Five article calls, then one overview per cluster; no title calls.
        assert_eq!(pipeline.summarizer.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_empty_batch_ends_early() {
        let mut short = article("BBC", "Brief");
        short.text = "Too short.".to_string();
        let fetcher = StaticFetcher {
            articles: vec![short],
        };
        let pipeline = Pipeline::new(
            fetcher,
            FixedEmbedder::default(),
            EchoSummarizer::default(),
            MemoryStore::default(),
            settings(),
        )
        .unwrap();

        let report = pipeline.run(None).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.eligible, 0);
        assert!(report.clusters.is_empty());
        assert!(report.succeeded());
        assert_eq!(pipeline.summarizer.calls.load(Ordering::SeqCst), 0);
        assert!(pipeline.store().list_clusters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_known_and_repeated_titles_are_skipped() {
        let (mut fetcher, embedder) = scenario();
        // Same identity twice, and a different outlet reusing a title.
        fetcher.articles.push(article("BBC", "Storm hits coast"));
        fetcher.articles.push(article("Guardian", "Markets rally on rate cut"));

        let store = MemoryStore::default();
        let seeded = RunOutput::from_reports(&[ClusterReport {
            number: 1,
            title: "Old".to_string(),
            overview: "Old news".to_string(),
            articles: vec![SummarizedArticle {
                title: "Stocks surge after rate decision".to_string(),
                source: "Reuters".to_string(),
                url: "https://reuters.example/old".to_string(),
                text: "old".to_string(),
                article_summary: "old".to_string(),
            }],
        }]);
        store.bulk_create(&seeded.to_batches()).await;

        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), store, settings()).unwrap();
        let report = pipeline.run(None).await.unwrap();

        assert_eq!(report.fetched, 7);
        assert_eq!(report.skipped_known, 2);
        assert_eq!(report.eligible, 4);
        // The market story lost its partner, so only the storm cluster remains.
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].articles.len(), 3);
    }

    #[tokio::test]
    async fn test_cutoff_respects_since() {
        let (mut fetcher, embedder) = scenario();
        fetcher.articles[1].published_at = Some(Utc::now() - chrono::Duration::hours(100));
        fetcher.articles[2].published_at = Some(Utc::now() - chrono::Duration::hours(5));

        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();
        let since = Utc::now() - chrono::Duration::hours(2);
        let report = pipeline.run(Some(since)).await.unwrap();

        assert_eq!(report.eligible, 3);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].articles[0].source, "AP");
    }

    #[test]
    fn test_cutoff_takes_later_bound() {
        let (fetcher, embedder) = scenario();
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();
        let now = Utc::now();
        let by_age = now - chrono::Duration::hours(72);
        assert_eq!(pipeline.cutoff(now, None), by_age);
        assert_eq!(pipeline.cutoff(now, Some(by_age - chrono::Duration::hours(1))), by_age);
        let recent = now - chrono::Duration::hours(3);
        assert_eq!(pipeline.cutoff(now, Some(recent)), recent);
    }

    #[test]
    fn test_cutoff_saturates_for_huge_max_age() {
        let (fetcher, embedder) = scenario();
        let mut settings = settings();
        settings.max_age = chrono::Duration::MAX;
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings)
                .unwrap();
        let now = Utc::now();
        assert_eq!(pipeline.cutoff(now, None), DateTime::<Utc>::MIN_UTC);
        let recent = now - chrono::Duration::hours(3);
        assert_eq!(pipeline.cutoff(now, Some(recent)), recent);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let (fetcher, _) = scenario();
        let pipeline = Pipeline::new(
            fetcher,
            FixedEmbedder::default(),
            EchoSummarizer::default(),
            MemoryStore::default(),
            settings(),
        )
        .unwrap();

        let err = pipeline.run(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));
        assert!(pipeline.store().list_clusters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, embedder) = scenario();
        let mut settings = settings();
        settings.json_output_dir = Some(dir.path().to_path_buf());
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings)
                .unwrap();

        let report = pipeline.run(None).await.unwrap();
        let path = report.output_path.expect("output path");
        assert!(path.starts_with(dir.path()));
        let saved = crate::outputs::read_run_output(&path).await.unwrap();
        assert_eq!(saved.clusters.len(), 2);
        assert_eq!(saved.clusters[&1].cluster_name, "Storm Hits Coast");
        assert_eq!(saved.clusters[&1].cluster_summary, "overview of 3 reports");
        assert_eq!(saved.clusters[&2].cluster_summary, "overview of 2 reports");
    }

    #[tokio::test]
    async fn test_persist_from_offset_reports_absolute_index() {
        let (fetcher, embedder) = scenario();
        let pipeline =
            Pipeline::new(fetcher, embedder, EchoSummarizer::default(), MemoryStore::default(), settings())
                .unwrap();
        let report = pipeline.run(None).await.unwrap();
        let batches = RunOutput::from_reports(&report.clusters).to_batches();

        // Everything is stored already; resuming at group 1 hits a duplicate there.
        let outcome = persist(pipeline.store(), &batches, 1).await;
        assert_eq!(outcome.clusters_created(), 0);
        assert_eq!(outcome.failure.unwrap().index, 1);

        let fresh = MemoryStore::default();
        let outcome = persist(&fresh, &batches, 1).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.clusters_created(), 1);
        assert_eq!(fresh.list_articles().await.unwrap().len(), 2);

        assert!(persist(&fresh, &batches, 5).await.is_complete());
    }
}
