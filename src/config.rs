//! Pipeline configuration loaded from YAML.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration that clusters nothing (no feeds) into an in-memory store.
//!
//! ```yaml
//! feeds:
//!   - source: BBC News
//!     url: https://feeds.bbci.co.uk/news/rss.xml
//! clustering:
//!   threshold: 0.7
//! storage:
//!   backend: rest
//!   url: http://localhost:5000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

use crate::cluster::DEFAULT_THRESHOLD;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feeds: Vec<FeedConfig>,
    pub clustering: ClusteringConfig,
    pub filters: FilterConfig,
    pub workers: WorkerConfig,
    pub embedding: EmbeddingConfig,
    pub summarizer: SummarizerConfig,
    pub storage: StorageConfig,
    pub output: OutputConfig,
}

/// One RSS feed and the outlet name its articles are attributed to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedConfig {
    pub source: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub threshold: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Articles with fewer characters of text are not eligible.
    pub min_text_chars: usize,
    /// Articles published longer ago than this are skipped.
    pub max_age_hours: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            max_age_hours: 72,
        }
    }
}

impl FilterConfig {
    /// The age limit as a duration, saturating at the largest one chrono holds.
    pub fn max_age(&self) -> chrono::Duration {
        i64::try_from(self.max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub fetch: usize,
    pub summarize: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch: 6,
            summarize: 6,
        }
    }
}

/// OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    /// Environment variable holding the bearer token, if the endpoint needs one.
    pub api_key_env: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Article text is clipped to this many characters before embedding.
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
            max_input_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Path to the `awful_aj` config.yaml; defaults to the one in its config dir.
    pub awful_config: Option<PathBuf>,
    pub templates: TemplateNames,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            awful_config: None,
            templates: TemplateNames::default(),
            timeout_secs: 90,
            max_retries: 3,
        }
    }
}

impl SummarizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Upper bound for `filters.max_age_hours`: one hundred years.
pub const MAX_AGE_HOURS_LIMIT: u64 = 24 * 365 * 100;

/// `awful_aj` chat template names, one per summary mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateNames {
    pub article: String,
    pub cluster: String,
    pub title: String,
}

impl Default for TemplateNames {
    fn default() -> Self {
        Self {
            article: "news_article_summary".to_string(),
            cluster: "news_cluster_overview".to_string(),
            title: "news_cluster_title".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Rest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base URL of the storage REST API, e.g. `http://localhost:5000`.
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving one JSON document per run.
    pub json_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit; treat it as all defaults.
        let config: PipelineConfig = if yaml.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml(&yaml)?;
        info!(
            feeds = config.feeds.len(),
            threshold = config.clustering.threshold,
            backend = ?config.storage.backend,
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.clustering.threshold;
        if !t.is_finite() || !(-1.0..=1.0).contains(&t) {
            return Err(ConfigError::Invalid(format!(
                "clustering.threshold must be within [-1, 1], got {t}"
            )));
        }
        let hours = self.filters.max_age_hours;
        if !(1..=MAX_AGE_HOURS_LIMIT).contains(&hours) {
            return Err(ConfigError::Invalid(format!(
                "filters.max_age_hours must be within [1, {MAX_AGE_HOURS_LIMIT}], got {hours}"
            )));
        }
        if self.workers.fetch == 0 || self.workers.summarize == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Rest && self.storage.url.is_none() {
            return Err(ConfigError::Invalid(
                "storage.url is required for the rest backend".to_string(),
            ));
        }
        if let Some(feed) = self.feeds.iter().find(|f| url::Url::parse(&f.url).is_err()) {
            return Err(ConfigError::Invalid(format!(
                "feed {} has an invalid url: {}",
                feed.source, feed.url
            )));
        }
        Ok(())
    }

    /// Fail unless storage outlives the process; `action` names the command.
    pub fn require_shared_store(&self, action: &str) -> Result<(), ConfigError> {
        match self.storage.backend {
            StorageBackend::Rest => Ok(()),
            StorageBackend::Memory => Err(ConfigError::Invalid(format!(
                "{action} needs the rest storage backend (set storage.url or --storage-url); \
                 the memory store starts empty and is lost on exit"
            ))),
        }
    }

    /// Fail unless a run leaves something behind: a REST store or a JSON output dir.
    pub fn require_durable_run(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Memory && self.output.json_dir.is_none() {
            return Err(ConfigError::Invalid(
                "a run with the memory store needs a JSON output dir (output.json_dir or -j), \
                 otherwise its clusters are lost on exit"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert!(config.feeds.is_empty());
        assert_eq!(config.clustering.threshold, 0.70);
        assert_eq!(config.filters.min_text_chars, 100);
        assert_eq!(config.filters.max_age_hours, 72);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.summarizer.templates.cluster, "news_cluster_overview");
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
feeds:
  - source: BBC News
    url: https://feeds.bbci.co.uk/news/rss.xml
  - source: NPR
    url: https://feeds.npr.org/1001/rss.xml
clustering:
  threshold: 0.8
workers:
  fetch: 4
storage:
  backend: rest
  url: http://localhost:5000
output:
  json_dir: ./runs
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[1].source, "NPR");
        assert_eq!(config.clustering.threshold, 0.8);
        assert_eq!(config.workers.fetch, 4);
        assert_eq!(config.workers.summarize, 6);
        assert_eq!(config.storage.backend, StorageBackend::Rest);
        assert_eq!(config.output.json_dir, Some(PathBuf::from("./runs")));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = PipelineConfig::from_yaml("clustering:\n  threshold: 1.3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rest_backend_needs_url() {
        let err = PipelineConfig::from_yaml("storage:\n  backend: rest\n").unwrap_err();
        assert!(err.to_string().contains("storage.url"));
    }

    #[test]
    fn test_invalid_feed_url() {
        let yaml = "feeds:\n  - source: Broken\n    url: not a url\n";
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_max_age() {
        assert_eq!(FilterConfig::default().max_age(), chrono::Duration::hours(72));
    }

    #[test]
    fn test_max_age_hours_bounds() {
        let err = PipelineConfig::from_yaml("filters:\n  max_age_hours: 10000000000\n").unwrap_err();
        assert!(err.to_string().contains("max_age_hours"));
        assert!(PipelineConfig::from_yaml("filters:\n  max_age_hours: 0\n").is_err());
        assert!(PipelineConfig::from_yaml("filters:\n  max_age_hours: 876000\n").is_ok());

        let huge = FilterConfig {
            max_age_hours: u64::MAX,
            ..FilterConfig::default()
        };
        assert_eq!(huge.max_age(), chrono::Duration::MAX);
    }

    #[test]
    fn test_memory_store_is_not_shared() {
        let config = PipelineConfig::default();
        let err = config.require_shared_store("upload").unwrap_err();
        assert!(matches!(&err, ConfigError::Invalid(msg) if msg.starts_with("upload needs")));
        assert!(config.require_durable_run().is_err());

        let mut with_dir = PipelineConfig::default();
        with_dir.output.json_dir = Some(PathBuf::from("./runs"));
        assert!(with_dir.require_durable_run().is_ok());
        assert!(with_dir.require_shared_store("clusters").is_err());

        let rest = PipelineConfig::from_yaml("storage:\n  backend: rest\n  url: http://localhost:5000\n").unwrap();
        assert!(rest.require_shared_store("clusters").is_ok());
        assert!(rest.require_durable_run().is_ok());
    }
}
