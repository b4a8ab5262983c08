use async_trait::async_trait;
use chromiumoxide::element::Element;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::config::CrawlSection;

use super::error::{BrowserError, BrowserResult};

/// What an extractor pulls out of one item element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub id: String,
    pub pinned: bool,
    pub payload: serde_json::Value,
}

impl ExtractedItem {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            pinned: false,
            payload,
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Turns a site's item elements into identifiers and payloads.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// CSS selector matching every item on a target page, topmost first.
    fn item_selector(&self) -> &str;

    /// `Ok(None)` when the element carries no usable identifier.
    async fn extract(&self, element: &Element) -> BrowserResult<Option<ExtractedItem>>;
}

const TWEET_SELECTOR: &str = r#"[data-testid="tweet"]"#;
const PERMALINK_SELECTOR: &str = "a:has(> time)";

/// Extractor for tweet-style timelines.
#[derive(Debug, Clone)]
pub struct TweetExtractor {
    pinned_label: String,
    origin: Url,
    status_id: Regex,
}

impl TweetExtractor {
    pub fn new(pinned_label: impl Into<String>, site_origin: &str) -> BrowserResult<Self> {
        let origin = Url::parse(site_origin).map_err(|err| {
            BrowserError::Configuration(format!("invalid site origin {site_origin}: {err}"))
        })?;
        let status_id = Regex::new(r"/status/(\d+)").expect("valid regex");
        Ok(Self {
            pinned_label: pinned_label.into(),
            origin,
            status_id,
        })
    }

    pub fn from_config(config: &CrawlSection) -> BrowserResult<Self> {
        Self::new(config.pinned_label.clone(), &config.site_origin)
    }

    pub(crate) fn classify(&self, text: &str, href: Option<&str>) -> Option<ExtractedItem> {
        let pinned = text.trim_start().starts_with(&self.pinned_label);
        let href = href.map(str::trim).filter(|href| !href.is_empty());

        let id = href.and_then(|href| self.item_id(href));
        let id = match (id, pinned) {
            (Some(id), _) => id,
            (None, true) => String::new(),
            (None, false) => return None,
        };

        let url = href.and_then(|href| self.origin.join(href).ok());
        Some(ExtractedItem {
            id,
            pinned,
            payload: json!({
                "text": text.trim(),
                "url": url.map(|url| url.to_string()),
            }),
        })
    }

    fn item_id(&self, href: &str) -> Option<String> {
        if let Some(captures) = self.status_id.captures(href) {
            return Some(captures[1].to_string());
        }
        href.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl PageExtractor for TweetExtractor {
    fn item_selector(&self) -> &str {
        TWEET_SELECTOR
    }

    async fn extract(&self, element: &Element) -> BrowserResult<Option<ExtractedItem>> {
        element.scroll_into_view().await?;
        let text = element.inner_text().await?.unwrap_or_default();
        let href = match element.find_element(PERMALINK_SELECTOR).await {
            Ok(anchor) => anchor.attribute("href").await?,
            Err(_) => None,
        };
        Ok(self.classify(&text, href.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> TweetExtractor {
        TweetExtractor::new("Pinned", "https://x.com").unwrap()
    }

    #[test]
    fn status_href_yields_numeric_id_and_absolute_url() {
        let item = extractor()
            .classify(
                "Breaking: coach hired\n2h",
                Some("/PeteThamel/status/1790000000000000001"),
            )
            .unwrap();
        assert_eq!(item.id, "1790000000000000001");
        assert!(!item.pinned);
        assert_eq!(
            item.payload["url"],
            "https://x.com/PeteThamel/status/1790000000000000001"
        );
        assert_eq!(item.payload["text"], "Breaking: coach hired\n2h");
    }

    #[test]
    fn non_status_href_uses_last_segment() {
        let item = extractor().classify("post", Some("/feed/items/abc/")).unwrap();
        assert_eq!(item.id, "abc");
    }

    #[test]
    fn pinned_label_marks_item() {
        let item = extractor()
            .classify("Pinned\nOld announcement", Some("/a/status/42"))
            .unwrap();
        assert!(item.pinned);
        assert_eq!(item.id, "42");
    }

    #[test]
    fn missing_permalink_is_unidentifiable() {
        assert!(extractor().classify("promoted content", None).is_none());
        assert!(extractor().classify("promoted content", Some("  ")).is_none());
    }

    #[test]
    fn pinned_without_permalink_is_still_reported_as_pinned() {
        let item = extractor().classify("Pinned", None).unwrap();
        assert!(item.pinned);
        assert!(item.id.is_empty());
    }

    #[test]
    fn invalid_origin_is_a_configuration_error() {
        assert!(matches!(
            TweetExtractor::new("Pinned", "not a url"),
            Err(BrowserError::Configuration(_))
        ));
    }
}
