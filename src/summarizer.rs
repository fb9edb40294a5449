//! Article and cluster summarization on top of an external LLM.
//!
//! Every call to the model is bounded by a timeout and reported as a
//! `Result<String, SummaryError>`. Failures never abort a run: callers turn
//! them into [`NO_SUMMARY`] or a word-truncation title with
//! [`or_placeholder`] and [`fallback_title`] at the point of use.

use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::api::{AskAsync, AskFnWrapper, RetryAsk};
use crate::config::SummarizerConfig;
use crate::error::{ConfigError, SummaryError};
use crate::models::NO_SUMMARY;
use crate::utils::{first_words, truncate_for_log};

/// Number of overview words used when the title call fails.
pub const FALLBACK_TITLE_WORDS: usize = 5;

/// What the summarizer is being asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    /// A short summary of one article body.
    Article,
    /// One synthesis of several bulleted article summaries of the same event.
    Cluster,
    /// A 3–5 word headline for a cluster overview.
    Title,
}

/// The summarization collaborator.
pub trait Summarizer {
    async fn summarize(&self, text: &str, mode: SummaryMode) -> Result<String, SummaryError>;
}

/// Overview and title for one cluster, with flags for degraded output.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub overview: String,
    pub title: String,
    pub overview_degraded: bool,
    pub title_fallback: bool,
}

/// Run `fut`, failing with [`SummaryError::Timeout`] after `limit`.
pub async fn with_timeout<F>(limit: Duration, fut: F) -> Result<String, SummaryError>
where
    F: Future<Output = Result<String, SummaryError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(SummaryError::Timeout(limit)))
}

/// Convert a summary result into the string that gets stored.
pub fn or_placeholder(result: Result<String, SummaryError>) -> String {
    result.unwrap_or_else(|_| NO_SUMMARY.to_string())
}

/// Deterministic title: the first few words of the overview.
pub fn fallback_title(overview: &str) -> String {
    first_words(overview, FALLBACK_TITLE_WORDS)
}

/// Summarize one article body.
///
/// Texts shorter than `min_chars` characters are rejected with
/// [`SummaryError::InsufficientContent`] without calling the model.
pub async fn summarize_article<S: Summarizer>(
    summarizer: &S,
    text: &str,
    min_chars: usize,
    limit: Duration,
) -> Result<String, SummaryError> {
    let chars = text.trim().chars().count();
    if chars < min_chars {
        return Err(SummaryError::InsufficientContent {
            chars,
            min: min_chars,
        });
    }
    with_timeout(limit, summarizer.summarize(text, SummaryMode::Article))
        .await
        .map(|s| s.trim().to_string())
}

/// Join member summaries as a bulleted list, one per line.
pub fn combine_summaries<S: AsRef<str>>(summaries: &[S]) -> String {
    summaries
        .iter()
        .map(|s| format!("- {}", s.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produce a cluster overview from its members' summaries, then a title.
///
/// Never fails: a failed overview becomes [`NO_SUMMARY`], a failed title
/// becomes the first [`FALLBACK_TITLE_WORDS`] words of the overview. The
/// title call is skipped when the overview already failed.
#[instrument(level = "info", skip_all, fields(members = member_summaries.len()))]
pub async fn summarize_cluster<S: Summarizer, T: AsRef<str>>(
    summarizer: &S,
    member_summaries: &[T],
    limit: Duration,
) -> ClusterSummary {
    let combined = combine_summaries(member_summaries);

    let overview = with_timeout(limit, summarizer.summarize(&combined, SummaryMode::Cluster))
        .await
        .map(|s| s.trim().to_string())
        .and_then(non_empty);
    let overview_degraded = overview.is_err();
    if let Err(e) = &overview {
        warn!(error = %e, "Cluster overview unavailable; using placeholder");
    }
    let overview = or_placeholder(overview);

    // A placeholder overview has nothing to title.
    let (title, title_fallback) = if overview_degraded {
        (fallback_title(&overview), true)
    } else {
        let title = with_timeout(limit, summarizer.summarize(&overview, SummaryMode::Title))
            .await
            .map(|t| clean_title(&t))
            .and_then(non_empty);
        match title {
            Ok(t) => (t, false),
            Err(e) => {
                debug!(error = %e, "Title call failed; using first words of overview");
                (fallback_title(&overview), true)
            }
        }
    };

    ClusterSummary {
        overview,
        title,
        overview_degraded,
        title_fallback,
    }
}

fn non_empty(s: String) -> Result<String, SummaryError> {
    if s.is_empty() {
        Err(SummaryError::Collaborator("empty response".to_string()))
    } else {
        Ok(s)
    }
}

/// Trim whitespace and any surrounding quotes a model tends to add.
fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

/// [`Summarizer`] backed by an OpenAI-compatible model through `awful_aj`.
///
/// Each [`SummaryMode`] has its own chat template; every request goes
/// through [`RetryAsk`].
pub struct LlmSummarizer {
    config: AwfulJadeConfig,
    article: ChatTemplate,
    cluster: ChatTemplate,
    title: ChatTemplate,
    max_retries: usize,
    base_delay: Duration,
}

impl LlmSummarizer {
    /// Load the `awful_aj` config and the three templates named in `settings`.
    #[instrument(level = "info", skip_all)]
    pub async fn load(settings: &SummarizerConfig) -> Result<Self, ConfigError> {
        let config_path = match &settings.awful_config {
            Some(path) => path.clone(),
            None => awful_aj::config_dir()
                .map_err(|e| ConfigError::Summarizer(e.to_string()))?
                .join("config.yaml"),
        };
        let config = load_awful_config(&config_path)?;
        info!(path = %config_path.display(), "Loaded summarizer configuration");

        let article = load_chat_template(&settings.templates.article).await?;
        let cluster = load_chat_template(&settings.templates.cluster).await?;
        let title = load_chat_template(&settings.templates.title).await?;
        info!(
            article = %settings.templates.article,
            cluster = %settings.templates.cluster,
            title = %settings.templates.title,
            "Loaded summarizer templates"
        );

        Ok(Self {
            config,
            article,
            cluster,
            title,
            max_retries: settings.max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    fn template(&self, mode: SummaryMode) -> &ChatTemplate {
        match mode {
            SummaryMode::Article => &self.article,
            SummaryMode::Cluster => &self.cluster,
            SummaryMode::Title => &self.title,
        }
    }
}

impl Summarizer for LlmSummarizer {
    #[instrument(level = "debug", skip(self, text), fields(chars = text.len()))]
    async fn summarize(&self, text: &str, mode: SummaryMode) -> Result<String, SummaryError> {
        let client = AskFnWrapper {
            config: &self.config,
            template: self.template(mode),
        };
        let api = RetryAsk::new(client, self.max_retries, self.base_delay);
        match api.ask(text).await {
            Ok(response) => {
                debug!(?mode, response = %truncate_for_log(&response, 200), "Summarizer responded");
                Ok(response)
            }
            Err(e) => Err(SummaryError::Collaborator(e.to_string())),
        }
    }
}

fn load_awful_config(path: &Path) -> Result<AwfulJadeConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Summarizer(format!("not a valid config filename: {}", path.display())))?;
    awful_aj::config::load_config(path).map_err(|e| ConfigError::Summarizer(format!("{path}: {e:?}")))
}

async fn load_chat_template(name: &str) -> Result<ChatTemplate, ConfigError> {
    awful_aj::template::load_template(name)
        .await
        .map_err(|e| ConfigError::Summarizer(format!("template {name}: {e}")))
}
