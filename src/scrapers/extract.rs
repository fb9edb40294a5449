//! Article body extraction from HTML pages.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::utils::collapse_whitespace;

// Tried in order; the first selector yielding any text wins.
static BODY_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article p", "main p", "p"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

/// Paragraph text of an article page, whitespace-collapsed and joined with
/// blank lines. Empty when the page has no paragraphs.
pub fn article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    for selector in BODY_SELECTORS.iter() {
        let paragraphs: Vec<String> = document
            .select(selector)
            .map(|p| collapse_whitespace(&p.text().collect::<Vec<_>>().join(" ")))
            .filter(|p| !p.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return paragraphs.join("\n\n");
        }
    }
    String::new()
}

/// Plain text of an HTML fragment, such as an RSS `description`.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}
