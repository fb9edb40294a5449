//! RSS 2.0 feed indexing and article page fetching.
//!
//! # URL Handling
//!
//! Item links are canonicalized before they become part of an article's
//! identity: the fragment is removed and `utm_*` tracking parameters are
//! dropped, so the same story shared with different campaign tags is
//! recognized as one article.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::Fetcher;
use super::extract::{article_text, fragment_text};
use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::models::FetchedArticle;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// One usable feed entry, before its page has been fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub description: String,
}

/// Parse an RSS document into items attributed to `source`.
///
/// Items without a title or a parseable link are dropped.
pub fn parse_feed(source: &str, xml: &str) -> Result<Vec<FeedItem>, FetchError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    let items = rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let title = item.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
            let url = canonical_url(item.link.as_deref()?.trim())?;
            Some(FeedItem {
                source: source.to_string(),
                title,
                url,
                published_at: item.pub_date.as_deref().and_then(parse_pub_date),
                description: item
                    .description
                    .as_deref()
                    .map(fragment_text)
                    .unwrap_or_default(),
            })
        })
        .collect();
    Ok(items)
}

/// RFC 2822 as RSS prescribes, falling back to RFC 3339 which some feeds emit.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Absolute URL without fragment and without `utm_*` query parameters.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

/// Fetches every configured feed and the pages its recent items link to.
#[derive(Debug, Clone)]
pub struct RssFetcher {
    client: reqwest::Client,
    feeds: Vec<FeedConfig>,
    workers: usize,
}

impl RssFetcher {
    pub fn new(feeds: Vec<FeedConfig>, workers: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            feeds,
            workers: workers.max(1),
        })
    }

    #[instrument(level = "info", skip_all, fields(source = %feed.source))]
    async fn index_feed(&self, feed: &FeedConfig) -> Result<Vec<FeedItem>, FetchError> {
        let xml = self
            .client
            .get(&feed.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let items = parse_feed(&feed.source, &xml)?;
        info!(count = items.len(), "Indexed feed items");
        Ok(items)
    }

    #[instrument(level = "debug", skip_all, fields(url = %item.url))]
    async fn fetch_item(&self, item: FeedItem) -> Option<FetchedArticle> {
        let page = async {
            self.client
                .get(&item.url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        };
        let html = match page.await {
            Ok(html) => html,
            Err(e) => {
                error!(error = %e, source = %item.source, "Article fetch failed");
                return None;
            }
        };

        let mut text = article_text(&html);
        if text.is_empty() {
            debug!("Page had no paragraphs; using feed description");
            text = item.description;
        }
        if text.is_empty() {
            warn!(source = %item.source, "Article produced no content");
            return None;
        }

        Some(FetchedArticle {
            source: item.source,
            title: item.title,
            url: item.url,
            text,
            published_at: item.published_at,
        })
    }
}

impl Fetcher for RssFetcher {
    #[instrument(level = "info", skip_all, fields(feeds = self.feeds.len(), %cutoff))]
    async fn fetch(&self, cutoff: DateTime<Utc>) -> Vec<FetchedArticle> {
        let indexed: Vec<Vec<FeedItem>> = stream::iter(&self.feeds)
            .map(|feed| async move {
                match self.index_feed(feed).await {
                    Ok(items) => items,
                    Err(e) => {
                        error!(error = %e, source = %feed.source, url = %feed.url, "Feed indexing failed");
                        Vec::new()
                    }
                }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let recent: Vec<FeedItem> = indexed
            .into_iter()
            .flatten()
            .filter(|item| item.published_at.is_none_or(|p| p >= cutoff))
            .collect();
        info!(count = recent.len(), "Recent feed items to fetch");

        let articles: Vec<FetchedArticle> = stream::iter(recent)
            .map(|item| self.fetch_item(item))
            .buffered(self.workers)
            .filter_map(|opt| std::future::ready(opt))
            .collect()
            .await;

        info!(count = articles.len(), "Fetched article contents");
        articles
    }
}
