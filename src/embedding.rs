//! Embedding providers.
//!
//! The pipeline only needs "texts in, one vector per text out, same order".
//! [`HttpEmbedder`] speaks the OpenAI `/v1/embeddings` protocol, which
//! OpenAI, Ollama, vLLM and llama.cpp servers all accept.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 32s)
//! - other 4xx → fail immediately
//! - network errors → retry

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Maps texts to dense vectors.
pub trait Embedder {
    /// Embed `texts`, returning exactly one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// OpenAI-compatible embeddings client.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        if config.api_key_env.is_some() && api_key.is_none() {
            warn!(var = ?config.api_key_env, "Embedding API key variable is not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "Retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        return parsed.into_vectors(texts.len());
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = EmbeddingError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, error = %err, "Embedding request failed; will retry");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Embedding request failed; will retry");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EmbeddingError::Malformed("no attempt was made".to_string())))
    }
}

impl Embedder for HttpEmbedder {
    #[instrument(level = "info", skip_all, fields(texts = texts.len(), model = %self.model))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        info!(count = vectors.len(), "Embedded texts");
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Vectors in input order; items are sorted by `index` when present.
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.data.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                found: self.data.len(),
            });
        }
        if self.data.iter().all(|d| d.index.is_some()) {
            self.data.sort_by_key(|d| d.index);
            let in_range = self
                .data
                .iter()
                .enumerate()
                .all(|(i, d)| d.index == Some(i));
            if !in_range {
                return Err(EmbeddingError::Malformed(
                    "response indices do not cover the input".to_string(),
                ));
            }
        }
        Ok(self.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Looks vectors up by exact text; unknown texts are an API error.
    #[derive(Default)]
    pub struct FixedEmbedder {
        pub vectors: HashMap<String, Vec<f32>>,
    }

    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts
                .iter()
                .map(|t| {
                    self.vectors.get(t).cloned().ok_or_else(|| EmbeddingError::Api {
                        status: 400,
                        body: format!("no vector for {t:?}"),
                    })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_sorted_by_index() {
        let json = r#"{"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ], "model": "m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let vectors = parsed.into_vectors(2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_without_indices_keeps_order() {
        let json = r#"{"data": [{"embedding": [0.5]}, {"embedding": [0.25]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_vectors(2).unwrap(), vec![vec![0.5], vec![0.25]]);
    }

    #[test]
    fn test_response_count_mismatch() {
        let json = r#"{"data": [{"index": 0, "embedding": [0.5]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let err = parsed.into_vectors(3).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 3,
                found: 1
            }
        ));
    }

    #[test]
    fn test_response_with_gap_in_indices() {
        let json = r#"{"data": [{"index": 0, "embedding": [1.0]}, {"index": 5, "embedding": [2.0]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed.into_vectors(2), Err(EmbeddingError::Malformed(_))));
    }

    #[test]
    fn test_new_clamps_batch_size() {
        let config = EmbeddingConfig {
            batch_size: 0,
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert_eq!(embedder.batch_size, 1);
    }
}
