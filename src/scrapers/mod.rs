//! Article sources.
//!
//! A fetch is two-phase, like every outlet scraper before it:
//!
//! 1. **Indexing**: read each configured RSS feed for item links and dates
//! 2. **Fetching**: download each recent item's page and extract its body text
//!
//! Failures in either phase are logged and skipped; a fetch never fails as a
//! whole, it just returns fewer articles.

use chrono::{DateTime, Utc};

use crate::models::FetchedArticle;

pub mod extract;
pub mod rss;

pub use rss::RssFetcher;

/// Produces the raw article batch for one run.
pub trait Fetcher {
    /// Articles published at or after `cutoff`, in ingestion order.
    ///
    /// Articles whose feed carries no date are kept; the caller decides.
    async fn fetch(&self, cutoff: DateTime<Utc>) -> Vec<FetchedArticle>;
}
