//! Exact pairwise cosine similarity over one batch of embeddings.
//!
//! Vectors are L2-normalized once, then every pair is scored with a dot
//! product. The full `N × N` matrix is kept; at a few thousand articles per
//! run that is a handful of megabytes.

use crate::error::ClusterError;

/// Dense similarity matrix for a batch of embeddings.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    len: usize,
    scores: Vec<f32>,
}

impl SimilarityIndex {
    /// Normalize `vectors` and score every pair.
    ///
    /// # Errors
    ///
    /// - [`ClusterError::EmptyBatch`] when `vectors` is empty
    /// - [`ClusterError::DimensionMismatch`] when vectors differ in length
    /// - [`ClusterError::DegenerateVector`] for zero-length, zero-norm or
    ///   non-finite vectors
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, ClusterError> {
        let first = vectors.first().ok_or(ClusterError::EmptyBatch)?;
        let dims = first.len();

        let mut normalized = Vec::with_capacity(vectors.len());
        for (index, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                return Err(ClusterError::DimensionMismatch {
                    index,
                    expected: dims,
                    found: v.len(),
                });
            }
            normalized.push(normalize(v).ok_or(ClusterError::DegenerateVector { index })?);
        }

        let len = normalized.len();
        let mut scores = vec![0.0f32; len * len];
        for i in 0..len {
            scores[i * len + i] = 1.0;
            for j in (i + 1)..len {
                let s = dot(&normalized[i], &normalized[j]).clamp(-1.0, 1.0);
                scores[i * len + j] = s;
                scores[j * len + i] = s;
            }
        }

        Ok(Self { len, scores })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cosine similarity of articles `i` and `j`.
    ///
    /// Panics if either index is out of range.
    pub fn similarity(&self, i: usize, j: usize) -> f32 {
        assert!(i < self.len && j < self.len, "index out of range");
        self.scores[i * self.len + j]
    }

    /// Every other article whose similarity to `i` is at least `threshold`,
    /// in ascending index order.
    pub fn neighbors(&self, i: usize, threshold: f32) -> impl Iterator<Item = usize> + '_ {
        let row = &self.scores[i * self.len..(i + 1) * self.len];
        row.iter()
            .enumerate()
            .filter(move |&(j, &s)| j != i && s >= threshold)
            .map(|(j, _)| j)
    }
}

fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if v.is_empty() || norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
