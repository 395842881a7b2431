//! Feed-based extraction: parses an RSS 2.0 feed and treats each entry as
//! one item. The whole feed counts as a single "page".

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::source::SourceConfig;
use crate::scrape::{ExtractedItem, Fetcher, PageResult, Scraper};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default, rename = "item")]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    author: Option<String>,
    category: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Parse RSS content into extracted items. Entries without a title or
/// link are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<ExtractedItem>, AppError> {
    let rss: Rss =
        from_str(xml).map_err(|e| AppError::Extraction(format!("invalid RSS feed: {e}")))?;

    let mut items = Vec::with_capacity(rss.channel.items.len());
    for entry in rss.channel.items {
        let title = entry.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let link = entry.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());

        let (Some(title), Some(link)) = (title, link) else {
            continue;
        };

        let mut extra = serde_json::Map::new();
        if let Some(category) = entry.category.as_deref() {
            extra.insert("category".to_string(), category.into());
        }

        items.push(ExtractedItem {
            source_url: link,
            title: Some(title),
            company: entry.author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            location: None,
            description: entry
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            salary_text: None,
            posted_at_text: entry.pub_date,
            extra,
        });
    }
    Ok(items)
}

pub struct FeedScraper {
    fetcher: Fetcher,
}

impl FeedScraper {
    pub fn new(fetcher: Fetcher) -> Self {
        FeedScraper { fetcher }
    }
}

#[async_trait]
impl Scraper for FeedScraper {
    fn name(&self) -> &str {
        "feed"
    }

    fn validate(&self, source: &SourceConfig) -> Result<(), AppError> {
        if source.feed_url.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Config(format!(
                "Source '{}' has no feed URL configured",
                source.name
            )));
        }
        Ok(())
    }

    async fn fetch_page(&self, source: &SourceConfig, page: u32) -> Result<PageResult, AppError> {
        if page > 1 {
            return Ok(PageResult::EndOfResults);
        }
        let feed_url = source
            .feed_url
            .as_deref()
            .ok_or_else(|| AppError::Config(format!("Source '{}' has no feed URL", source.name)))?;

        let body = self.fetcher.get_text(feed_url, source.request_timeout).await?;
        Ok(PageResult::Items(parse_feed(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Remote Jobs</title>
    <item>
      <title>Senior Rust Engineer</title>
      <link>https://jobs.example.com/rust-1</link>
      <description>Build data pipelines in Rust.</description>
      <author>Example Corp</author>
      <category>Engineering</category>
      <pubDate>Mon, 04 Aug 2025 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Backend Developer</title>
      <link>https://jobs.example.com/backend-2</link>
      <description>APIs and services.</description>
    </item>
    <item>
      <link>https://jobs.example.com/untitled</link>
      <description>No title, should be skipped.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_and_skips_incomplete_ones() {
        let items = parse_feed(FIXTURE).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("Senior Rust Engineer"));
        assert_eq!(items[0].source_url, "https://jobs.example.com/rust-1");
        assert_eq!(items[0].company.as_deref(), Some("Example Corp"));
        assert_eq!(
            items[0].posted_at_text.as_deref(),
            Some("Mon, 04 Aug 2025 09:00:00 GMT")
        );
        assert_eq!(items[0].extra.get("category").and_then(|v| v.as_str()), Some("Engineering"));
        assert_eq!(items[1].title.as_deref(), Some("Backend Developer"));
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = parse_feed("<rss><channel><item></rss>").unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[test]
    fn empty_channel_yields_no_items() {
        let items = parse_feed(
            r#"<rss version="2.0"><channel><title>empty</title></channel></rss>"#,
        )
        .unwrap();
        assert!(items.is_empty());
    }
}
