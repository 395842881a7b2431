//! Markup-based extraction: CSS selectors over fetched HTML pages.
//!
//! The selector map names a `job_container` selector plus per-field
//! selectors; missing field selectors fall back to conventional class
//! names. A page with zero matching containers means end-of-results.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::AppError;
use crate::models::source::SourceConfig;
use crate::scrape::{ExtractedItem, Fetcher, PageResult, Scraper};

const DEFAULT_SELECTORS: &[(&str, &str)] = &[
    ("job_container", ".job"),
    ("title", ".title"),
    ("company", ".company"),
    ("location", ".location"),
    ("description", ".description"),
    ("salary", ".salary"),
    ("posted_date", ".date"),
    ("url", "a"),
];

fn selector_for(source: &SourceConfig, field: &str) -> Result<Selector, AppError> {
    let raw = source.selector(field).unwrap_or_else(|| {
        DEFAULT_SELECTORS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, sel)| *sel)
            .unwrap_or("*")
    });
    Selector::parse(raw)
        .map_err(|e| AppError::Config(format!("invalid selector '{raw}' for '{field}': {e}")))
}

fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Build the URL for one result page. A `{page}` placeholder in the base
/// URL is substituted, otherwise a `page` query parameter is appended.
pub fn page_url(base_url: &str, page: u32) -> String {
    if base_url.contains("{page}") {
        base_url.replace("{page}", &page.to_string())
    } else if base_url.contains('?') {
        format!("{base_url}&page={page}")
    } else {
        format!("{base_url}?page={page}")
    }
}

/// Extract all job field-sets from one HTML page.
pub fn extract_items(
    html: &str,
    source: &SourceConfig,
    base_url: &str,
) -> Result<Vec<ExtractedItem>, AppError> {
    let container = selector_for(source, "job_container")?;
    let title_sel = selector_for(source, "title")?;
    let company_sel = selector_for(source, "company")?;
    let location_sel = selector_for(source, "location")?;
    let description_sel = selector_for(source, "description")?;
    let salary_sel = selector_for(source, "salary")?;
    let date_sel = selector_for(source, "posted_date")?;
    let url_sel = selector_for(source, "url")?;

    let base = Url::parse(base_url)
        .map_err(|e| AppError::Config(format!("invalid base URL '{base_url}': {e}")))?;

    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for element in document.select(&container) {
        let href = element
            .select(&url_sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(str::to_string);

        let source_url = match href.and_then(|h| base.join(&h).ok()) {
            Some(url) => url.to_string(),
            // Items without a link cannot be deduplicated or revisited.
            None => continue,
        };

        let title = select_text(element, &title_sel).filter(|t| !t.is_empty());
        if title.is_none() {
            continue;
        }

        items.push(ExtractedItem {
            source_url,
            title,
            company: select_text(element, &company_sel).filter(|s| !s.is_empty()),
            location: select_text(element, &location_sel).filter(|s| !s.is_empty()),
            description: select_text(element, &description_sel).filter(|s| !s.is_empty()),
            salary_text: select_text(element, &salary_sel).filter(|s| !s.is_empty()),
            posted_at_text: select_text(element, &date_sel).filter(|s| !s.is_empty()),
            extra: serde_json::Map::new(),
        });
    }
    Ok(items)
}

pub struct MarkupScraper {
    fetcher: Fetcher,
}

impl MarkupScraper {
    pub fn new(fetcher: Fetcher) -> Self {
        MarkupScraper { fetcher }
    }
}

#[async_trait]
impl Scraper for MarkupScraper {
    fn name(&self) -> &str {
        "markup"
    }

    fn validate(&self, source: &SourceConfig) -> Result<(), AppError> {
        if source.base_url.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Config(format!(
                "Source '{}' has no base URL configured",
                source.name
            )));
        }
        if source.selectors.is_empty() {
            return Err(AppError::Config(format!(
                "Source '{}' has no selectors configured for markup scraping",
                source.name
            )));
        }
        Ok(())
    }

    async fn fetch_page(&self, source: &SourceConfig, page: u32) -> Result<PageResult, AppError> {
        let base_url = source
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::Config(format!("Source '{}' has no base URL", source.name)))?;

        let url = page_url(base_url, page);
        tracing::debug!("Fetching page {page}: {url}");
        let body = self.fetcher.get_text(&url, source.request_timeout).await?;

        let items = extract_items(&body, source, base_url)?;
        if items.is_empty() {
            // Zero matching elements is end-of-results, not an error.
            return Ok(PageResult::EndOfResults);
        }
        Ok(PageResult::Items(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::source::StrategyKind;

    const FIXTURE: &str = r#"<html><body>
      <div class="job">
        <h2 class="title">Senior Rust Engineer</h2>
        <span class="company">Example Corp</span>
        <span class="location">Berlin, Germany</span>
        <p class="description">Build    data pipelines.</p>
        <span class="salary">€80,000 - €100,000</span>
        <span class="date">2025-08-01</span>
        <a href="/jobs/rust-1">Apply</a>
      </div>
      <div class="job">
        <h2 class="title">Backend Developer</h2>
        <a href="https://other.example.com/jobs/2">Apply</a>
      </div>
      <div class="job">
        <h2 class="title">No Link Job</h2>
      </div>
    </body></html>"#;

    fn markup_source() -> SourceConfig {
        let mut source = SourceConfig::new("example", StrategyKind::Markup);
        source.base_url = Some("https://jobs.example.com/search".to_string());
        source
            .selectors
            .insert("job_container".to_string(), ".job".to_string());
        source
    }

    #[test]
    fn extracts_fields_and_joins_relative_urls() {
        let source = markup_source();
        let items = extract_items(FIXTURE, &source, "https://jobs.example.com/search").unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title.as_deref(), Some("Senior Rust Engineer"));
        assert_eq!(first.company.as_deref(), Some("Example Corp"));
        assert_eq!(first.location.as_deref(), Some("Berlin, Germany"));
        assert_eq!(first.description.as_deref(), Some("Build data pipelines."));
        assert_eq!(first.salary_text.as_deref(), Some("€80,000 - €100,000"));
        assert_eq!(first.source_url, "https://jobs.example.com/jobs/rust-1");

        assert_eq!(items[1].source_url, "https://other.example.com/jobs/2");
    }

    #[test]
    fn zero_matches_yield_empty_set() {
        let source = markup_source();
        let items =
            extract_items("<html><body></body></html>", &source, "https://jobs.example.com")
                .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn bad_selector_is_a_config_error() {
        let mut source = markup_source();
        source
            .selectors
            .insert("job_container".to_string(), ":::".to_string());
        let err = extract_items(FIXTURE, &source, "https://jobs.example.com").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn page_url_substitutes_placeholder() {
        assert_eq!(
            page_url("https://x.test/jobs/{page}", 3),
            "https://x.test/jobs/3"
        );
        assert_eq!(page_url("https://x.test/jobs", 2), "https://x.test/jobs?page=2");
        assert_eq!(
            page_url("https://x.test/jobs?q=rust", 2),
            "https://x.test/jobs?q=rust&page=2"
        );
    }
}
