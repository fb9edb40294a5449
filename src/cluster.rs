//! Grouping of near-duplicate articles into clusters.
//!
//! Articles are nodes of a graph with an edge wherever two embeddings score
//! at least the threshold. Connected components are found breadth-first, so a
//! chain of similar pairs pulls its endpoints into one component even when
//! the endpoints themselves are not similar. Each component then keeps one
//! article per source and is dropped if fewer than two sources remain.

use std::collections::{HashSet, VecDeque};
use tracing::{debug, instrument};

use crate::error::ClusterError;
use crate::models::ArticleRecord;
use crate::similarity::SimilarityIndex;

/// Default similarity threshold for drawing an edge.
pub const DEFAULT_THRESHOLD: f32 = 0.70;

/// Minimum distinct-source members for a cluster to be emitted.
pub const MIN_CLUSTER_SOURCES: usize = 2;

/// One emitted cluster, as indices into the article batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPlan {
    /// 1-based, in order of the cluster's lowest article index.
    pub number: usize,
    /// Kept members in ascending index order, one per source.
    pub members: Vec<usize>,
    /// Same-source articles removed by deduplication.
    pub dropped: Vec<usize>,
}

/// Threshold-graph clusterer.
#[derive(Debug, Clone, Copy)]
pub struct ClusterBuilder {
    threshold: f32,
}

impl ClusterBuilder {
    /// # Errors
    ///
    /// [`ClusterError::InvalidThreshold`] unless `threshold` is finite and in `[-1, 1]`.
    pub fn new(threshold: f32) -> Result<Self, ClusterError> {
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(ClusterError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Connected components of the threshold graph, before deduplication.
    ///
    /// Components are seeded in index order and each lists its nodes in
    /// ascending order, so the output is fully determined by the input.
    pub fn components(&self, index: &SimilarityIndex) -> Vec<Vec<usize>> {
        let n = index.len();
        let mut visited = vec![false; n];
        let mut components = Vec::new();

        for seed in 0..n {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut component = vec![seed];
            let mut queue = VecDeque::from([seed]);
            while let Some(node) = queue.pop_front() {
                for next in index.neighbors(node, self.threshold) {
                    if !visited[next] {
                        visited[next] = true;
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// Cluster a batch given each article's source and the batch's similarity index.
    ///
    /// # Errors
    ///
    /// [`ClusterError::LengthMismatch`] when `sources` and `index` disagree in size.
    #[instrument(level = "debug", skip_all, fields(articles = sources.len(), threshold = self.threshold))]
    pub fn build<S: AsRef<str>>(
        &self,
        sources: &[S],
        index: &SimilarityIndex,
    ) -> Result<Vec<ClusterPlan>, ClusterError> {
        if sources.len() != index.len() {
            return Err(ClusterError::LengthMismatch {
                articles: sources.len(),
                vectors: index.len(),
            });
        }

        let mut plans = Vec::new();
        for component in self.components(index) {
            let (members, dropped) = dedup_by_source(&component, sources);
            if members.len() < MIN_CLUSTER_SOURCES {
                debug!(
                    raw = component.len(),
                    kept = members.len(),
                    "Discarding component below the source floor"
                );
                continue;
            }
            plans.push(ClusterPlan {
                number: plans.len() + 1,
                members,
                dropped,
            });
        }
        Ok(plans)
    }

    /// Build the similarity index from the records' embeddings and cluster them.
    pub fn cluster(&self, records: &[ArticleRecord]) -> Result<Vec<ClusterPlan>, ClusterError> {
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.embedding.clone()).collect();
        let index = SimilarityIndex::build(&vectors)?;
        let sources: Vec<&str> = records.iter().map(|r| r.source()).collect();
        self.build(&sources, &index)
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Keep the first article per source, walking `component` in order.
fn dedup_by_source<S: AsRef<str>>(component: &[usize], sources: &[S]) -> (Vec<usize>, Vec<usize>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for &i in component {
        if seen.insert(sources[i].as_ref()) {
            kept.push(i);
        } else {
            dropped.push(i);
        }
    }
    (kept, dropped)
}
