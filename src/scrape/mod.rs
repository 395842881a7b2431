// Scraper trait, strategy dispatch and the shared HTTP fetcher.
//
// Strategy selection tries a specialized scraper registered for the exact
// source name first, then falls back to the generic strategy implied by
// the source's declared kind.

pub mod feed;
pub mod markup;
pub mod orchestrator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::source::SourceConfig;

/// One extracted field-set, before deduplication and persistence.
#[derive(Debug, Clone, Default)]
pub struct ExtractedItem {
    pub source_url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_text: Option<String>,
    pub posted_at_text: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of fetching and extracting one page. Callers must handle every
/// case; "no more pages" and "not implemented" are not errors here.
#[derive(Debug)]
pub enum PageResult {
    Items(Vec<ExtractedItem>),
    EndOfResults,
    NotImplemented,
}

/// One extraction strategy or a specialized per-source implementation.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch and extract one page. Pages are numbered from 1; single-shot
    /// strategies (feeds) return `EndOfResults` for every later page.
    async fn fetch_page(&self, source: &SourceConfig, page: u32) -> Result<PageResult, AppError>;

    /// Validate the source configuration before the first fetch.
    fn validate(&self, _source: &SourceConfig) -> Result<(), AppError> {
        Ok(())
    }
}

/// Registry of specialized scrapers keyed by exact source name.
#[derive(Default)]
pub struct ScraperRegistry {
    scrapers: HashMap<String, Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_name: &str, scraper: Arc<dyn Scraper>) {
        self.scrapers.insert(source_name.to_string(), scraper);
    }

    pub fn get(&self, source_name: &str) -> Option<Arc<dyn Scraper>> {
        self.scrapers.get(source_name).cloned()
    }
}

/// Shared HTTP client with browser-like headers and per-request timeouts.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

impl Fetcher {
    pub fn new() -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Fetcher { client })
    }

    /// GET a URL as text, failing on non-2xx statuses.
    pub async fn get_text(&self, url: &str, timeout_secs: u64) -> Result<String, AppError> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(timeout_secs))
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.8")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("{url} returned {status}")));
        }
        Ok(resp.text().await?)
    }
}
