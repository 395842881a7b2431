//! Drives one scrape task: strategy selection, pagination, per-source
//! throttling, deduplication and raw item persistence.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::dedup::{DedupEngine, fingerprint_item};
use crate::error::AppError;
use crate::models::raw_item::RawItem;
use crate::models::source::{SourceConfig, StrategyKind};
use crate::models::task::ScrapeTask;
use crate::monitor::Monitor;
use crate::scrape::feed::FeedScraper;
use crate::scrape::markup::MarkupScraper;
use crate::scrape::{Fetcher, PageResult, Scraper, ScraperRegistry};
use crate::store::Store;

/// Cooperative stop request, observed at page boundaries.
pub type StopFlag = Arc<AtomicBool>;

#[derive(Debug, Default, Clone)]
pub struct ScrapeOutcome {
    pub items_found: i64,
    pub items_processed: i64,
    pub items_saved: i64,
    pub duplicates: i64,
    pub pages_scraped: u32,
    pub errors: Vec<String>,
    /// True when the run ended early because of a cancel/pause request.
    pub stopped: bool,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    dedup: DedupEngine,
    registry: ScraperRegistry,
    monitor: Arc<Monitor>,
    feed: Arc<dyn Scraper>,
    markup: Arc<dyn Scraper>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ScraperRegistry,
        fetcher: Fetcher,
        monitor: Arc<Monitor>,
    ) -> Self {
        Orchestrator {
            dedup: DedupEngine::new(store.clone()),
            store,
            registry,
            monitor,
            feed: Arc::new(FeedScraper::new(fetcher.clone())),
            markup: Arc::new(MarkupScraper::new(fetcher)),
        }
    }

    fn generic_scraper(&self, kind: StrategyKind) -> Option<Arc<dyn Scraper>> {
        match kind {
            StrategyKind::Feed => Some(self.feed.clone()),
            StrategyKind::Markup => Some(self.markup.clone()),
            // Explicit extension points; deployments register specialized
            // scrapers for these.
            StrategyKind::Api | StrategyKind::Hybrid => None,
        }
    }

    /// Execute one scrape task to completion, cancellation or failure.
    ///
    /// A specialized scraper registered under the source name is tried
    /// first; any failure from it is logged and the generic strategy for
    /// the declared kind takes over, reusing the accumulated outcome so
    /// task counts stay monotonic.
    pub async fn run(
        &self,
        task: &mut ScrapeTask,
        source: &SourceConfig,
        stop: &StopFlag,
    ) -> Result<ScrapeOutcome, AppError> {
        let mut outcome = ScrapeOutcome::default();
        let mut run_seen: HashSet<String> = HashSet::new();

        if let Some(special) = self.registry.get(&source.name) {
            tracing::info!("Using specialized scraper '{}' for {}", special.name(), source.name);
            match self
                .drive(special.as_ref(), task, source, stop, &mut outcome, &mut run_seen)
                .await
            {
                Ok(()) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(
                        "Specialized scraper failed for {}, falling back to {} strategy: {e}",
                        source.name,
                        source.strategy.as_str()
                    );
                    self.monitor
                        .record_error(&source.name, &e.to_string(), "specialized");
                }
            }
        }

        let generic = self.generic_scraper(source.strategy).ok_or_else(|| {
            AppError::NotImplemented(format!(
                "{} strategy is not implemented for source '{}'",
                source.strategy.as_str(),
                source.name
            ))
        })?;

        // Configuration problems surface before anything is fetched.
        generic.validate(source)?;

        self.drive(generic.as_ref(), task, source, stop, &mut outcome, &mut run_seen)
            .await?;
        Ok(outcome)
    }

    /// Run a sampling scrape without persisting anything. Used by the
    /// control surface to test a source configuration.
    pub async fn sample(
        &self,
        source: &SourceConfig,
        max_pages: u32,
    ) -> Result<Vec<crate::scrape::ExtractedItem>, AppError> {
        let scraper = match self.registry.get(&source.name) {
            Some(s) => s,
            None => self.generic_scraper(source.strategy).ok_or_else(|| {
                AppError::NotImplemented(format!(
                    "{} strategy is not implemented for source '{}'",
                    source.strategy.as_str(),
                    source.name
                ))
            })?,
        };
        scraper.validate(source)?;

        let mut collected = Vec::new();
        let pages = max_pages.clamp(1, source.effective_max_pages());
        for page in 1..=pages {
            match scraper.fetch_page(source, page).await? {
                PageResult::Items(items) => collected.extend(items),
                PageResult::EndOfResults => break,
                PageResult::NotImplemented => {
                    return Err(AppError::NotImplemented(format!(
                        "scraper '{}' is not implemented",
                        scraper.name()
                    )));
                }
            }
            if page < pages && source.rate_limit_delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(source.rate_limit_delay)).await;
            }
        }
        Ok(collected)
    }

    async fn drive(
        &self,
        scraper: &dyn Scraper,
        task: &mut ScrapeTask,
        source: &SourceConfig,
        stop: &StopFlag,
        outcome: &mut ScrapeOutcome,
        run_seen: &mut HashSet<String>,
    ) -> Result<(), AppError> {
        let max_pages = source.effective_max_pages();

        for page in 1..=max_pages {
            if stop.load(Ordering::Relaxed) {
                outcome.stopped = true;
                break;
            }

            let page_result = match scraper.fetch_page(source, page).await {
                Ok(result) => result,
                Err(e) if page > 1 && e.is_page_level() => {
                    // Retried-by-skip: record and move to the next page.
                    let msg = format!("page {page}: {e}");
                    tracing::warn!("Skipping page for {}: {msg}", source.name);
                    self.monitor.record_error(&source.name, &msg, "fetch");
                    outcome.errors.push(msg);
                    self.throttle(source, page, max_pages).await;
                    continue;
                }
                // The first fetch failing fails the whole run, as do
                // config and extraction-level errors at any point.
                Err(e) => return Err(e),
            };

            let items = match page_result {
                PageResult::Items(items) => items,
                PageResult::EndOfResults => break,
                PageResult::NotImplemented => {
                    return Err(AppError::NotImplemented(format!(
                        "scraper '{}' is not implemented",
                        scraper.name()
                    )));
                }
            };

            outcome.pages_scraped += 1;
            outcome.items_found += items.len() as i64;

            let (unique, batch_dups) = DedupEngine::dedupe_batch(items);
            outcome.duplicates += batch_dups.len() as i64;
            outcome.items_processed += batch_dups.len() as i64;

            for item in unique {
                outcome.items_processed += 1;
                let fp = fingerprint_item(&item);

                if run_seen.contains(&fp) || self.dedup.is_duplicate(source.id, &fp).await? {
                    outcome.duplicates += 1;
                    continue;
                }

                let mut extra = item.extra;
                extra.insert("page".to_string(), page.into());
                extra.insert("strategy".to_string(), scraper.name().into());

                let raw = RawItem {
                    id: Uuid::new_v4(),
                    source_id: source.id,
                    task_id: task.id,
                    source_url: item.source_url,
                    title: item.title,
                    company: item.company,
                    location: item.location,
                    description: item.description,
                    salary_text: item.salary_text,
                    posted_at_text: item.posted_at_text,
                    extra: serde_json::Value::Object(extra),
                    fingerprint: fp.clone(),
                    processed: false,
                    created_at: Utc::now(),
                };

                self.store.insert_raw_item(&raw).await?;
                run_seen.insert(fp);
                outcome.items_saved += 1;
            }

            // Counts are monotonically non-decreasing while running.
            task.items_found = outcome.items_found;
            task.items_processed = outcome.items_processed;
            task.items_saved = outcome.items_saved;
            task.duplicates = outcome.duplicates;
            self.store.update_task(task).await?;

            self.throttle(source, page, max_pages).await;
        }

        Ok(())
    }

    /// Rate-limit delay between page fetches. This is the main device for
    /// respecting target-site load and is never skipped.
    async fn throttle(&self, source: &SourceConfig, page: u32, max_pages: u32) {
        if page < max_pages && source.rate_limit_delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(source.rate_limit_delay)).await;
        }
    }
}
