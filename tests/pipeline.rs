//! End-to-end pipeline scenarios over the in-memory store, with stub
//! scrapers standing in for the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use jobharvest::error::AppError;
use jobharvest::models::source::{SourceConfig, StrategyKind};
use jobharvest::models::task::{ScrapeTask, TaskPriority, TaskStatus};
use jobharvest::monitor::Monitor;
use jobharvest::normalize::Normalizer;
use jobharvest::queue::TaskQueue;
use jobharvest::scrape::orchestrator::Orchestrator;
use jobharvest::scrape::{ExtractedItem, Fetcher, PageResult, Scraper, ScraperRegistry};
use jobharvest::store::{MemoryStore, Store};

struct PagedStub {
    pages: u32,
    per_page: usize,
    delay: Duration,
}

#[async_trait]
impl Scraper for PagedStub {
    fn name(&self) -> &str {
        "paged-stub"
    }

    async fn fetch_page(&self, source: &SourceConfig, page: u32) -> Result<PageResult, AppError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if page > self.pages {
            return Ok(PageResult::EndOfResults);
        }
        let items = (0..self.per_page)
            .map(|n| ExtractedItem {
                source_url: format!("https://example.com/{}/p{}/j{}", source.name, page, n),
                title: Some(format!("Job {page}-{n}")),
                company: Some("Example Corp".to_string()),
                location: Some("wfh".to_string()),
                description: Some(
                    "Build and run ingestion services in Rust with Docker and AWS. \
                     Health insurance and 401k included. $120,000 - $150,000."
                        .to_string(),
                ),
                salary_text: Some("$120,000 - $150,000".to_string()),
                ..Default::default()
            })
            .collect();
        Ok(PageResult::Items(items))
    }
}

/// Emits the same two listings on every call, one of them twice.
struct DuplicatingStub;

#[async_trait]
impl Scraper for DuplicatingStub {
    fn name(&self) -> &str {
        "dup-stub"
    }

    async fn fetch_page(&self, _source: &SourceConfig, page: u32) -> Result<PageResult, AppError> {
        if page > 1 {
            return Ok(PageResult::EndOfResults);
        }
        let listing = ExtractedItem {
            source_url: "https://example.com/jobs/1".to_string(),
            title: Some("Rust Engineer".to_string()),
            description: Some("Same posting listed twice.".to_string()),
            ..Default::default()
        };
        let other = ExtractedItem {
            source_url: "https://example.com/jobs/2".to_string(),
            title: Some("Backend Engineer".to_string()),
            description: Some("A different posting.".to_string()),
            ..Default::default()
        };
        Ok(PageResult::Items(vec![listing.clone(), other, listing]))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<TaskQueue>,
}

async fn harness(sources: &[(&SourceConfig, Arc<dyn Scraper>)], workers: usize) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mut registry = ScraperRegistry::new();
    for (source, scraper) in sources {
        store.create_source(source).await.unwrap();
        registry.register(&source.name, scraper.clone());
    }
    let monitor = Arc::new(Monitor::new());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone() as Arc<dyn Store>,
        registry,
        Fetcher::new().unwrap(),
        monitor.clone(),
    ));
    let queue = Arc::new(TaskQueue::new(
        store.clone(),
        orchestrator,
        monitor,
        workers,
    ));
    queue.start();
    Harness { store, queue }
}

async fn wait_for_terminal(store: &MemoryStore, task_id: Uuid) -> ScrapeTask {
    for _ in 0..300 {
        let task = store.get_task(task_id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task never reached a terminal status");
}

fn source(name: &str, max_pages: u32) -> SourceConfig {
    let mut s = SourceConfig::new(name, StrategyKind::Markup);
    s.rate_limit_delay = 0.0;
    s.max_pages = max_pages;
    s
}

#[tokio::test]
async fn run_stops_at_end_of_results_and_completes() {
    let src = source("board-a", 5);
    let stub: Arc<dyn Scraper> = Arc::new(PagedStub {
        pages: 2,
        per_page: 3,
        delay: Duration::ZERO,
    });
    let h = harness(&[(&src, stub)], 1).await;

    let task_id = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    let task = wait_for_terminal(&h.store, task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items_found, 6);
    assert_eq!(task.items_saved, 6);
    assert_eq!(task.duplicates, 0);
    assert!(task.error.is_none());
    assert_eq!(h.store.count_raw_items(Some(src.id)).await.unwrap(), 6);
}

#[tokio::test]
async fn duplicates_are_counted_but_stored_once() {
    let src = source("board-a", 3);
    let stub: Arc<dyn Scraper> = Arc::new(DuplicatingStub);
    let h = harness(&[(&src, stub)], 1).await;

    let task_id = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    let task = wait_for_terminal(&h.store, task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items_found, 3);
    assert_eq!(task.items_saved, 2);
    assert_eq!(task.duplicates, 1);
    assert_eq!(h.store.count_raw_items(Some(src.id)).await.unwrap(), 2);
}

#[tokio::test]
async fn rescrape_skips_everything_already_stored() {
    let src = source("board-a", 3);
    let stub: Arc<dyn Scraper> = Arc::new(PagedStub {
        pages: 1,
        per_page: 4,
        delay: Duration::ZERO,
    });
    let h = harness(&[(&src, stub)], 1).await;

    let first = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    wait_for_terminal(&h.store, first).await;

    let second = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    let task = wait_for_terminal(&h.store, second).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items_saved, 0);
    assert_eq!(task.duplicates, 4);
    assert_eq!(h.store.count_raw_items(Some(src.id)).await.unwrap(), 4);
}

#[tokio::test]
async fn cancel_mid_run_keeps_saved_items_and_frees_the_source() {
    let src = source("board-a", 30);
    let stub: Arc<dyn Scraper> = Arc::new(PagedStub {
        pages: 30,
        per_page: 1,
        delay: Duration::from_millis(100),
    });
    let h = harness(&[(&src, stub)], 1).await;

    let task_id = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    h.queue.cancel(task_id).await.unwrap();

    let task = wait_for_terminal(&h.store, task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("cancelled"));
    assert!(task.items_saved >= 1);
    assert_eq!(
        h.store.count_raw_items(Some(src.id)).await.unwrap(),
        task.items_saved
    );

    // The per-source lock was released with the task.
    h.queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_submissions_for_one_source_accept_exactly_one() {
    let src = source("board-a", 5);
    let stub: Arc<dyn Scraper> = Arc::new(PagedStub {
        pages: 5,
        per_page: 1,
        delay: Duration::from_millis(100),
    });
    let h = harness(&[(&src, stub)], 2).await;

    let (a, b) = tokio::join!(
        h.queue.submit(&src, TaskPriority::Normal, "manual"),
        h.queue.submit(&src, TaskPriority::Normal, "manual"),
    );
    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    let rejected = [a, b].into_iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(rejected.unwrap_err(), AppError::SourceBusy(_)));
}

#[tokio::test]
async fn unimplemented_strategy_fails_the_task_cleanly() {
    let mut src = source("board-api", 3);
    src.strategy = StrategyKind::Api;
    // No specialized scraper registered for this source.
    let h = harness(&[], 1).await;
    h.store.create_source(&src).await.unwrap();

    let task_id = h
        .queue
        .submit(&src, TaskPriority::Normal, "manual")
        .await
        .unwrap();
    let task = wait_for_terminal(&h.store, task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap_or("").contains("api"));
    assert_eq!(h.store.count_raw_items(Some(src.id)).await.unwrap(), 0);

    let updated = h.store.get_source(src.id).await.unwrap().unwrap();
    assert_eq!(updated.stats.failure_count, 1);
}

#[tokio::test]
async fn scraped_items_normalize_with_quality_scores() {
    let src = source("board-a", 2);
    let stub: Arc<dyn Scraper> = Arc::new(PagedStub {
        pages: 1,
        per_page: 2,
        delay: Duration::ZERO,
    });
    let h = harness(&[(&src, stub)], 1).await;

    let task_id = h
        .queue
        .submit(&src, TaskPriority::High, "manual")
        .await
        .unwrap();
    wait_for_terminal(&h.store, task_id).await;

    let normalizer = Normalizer::new(h.store.clone() as Arc<dyn Store>);
    let outcome = normalizer.normalize_pending(100).await.unwrap();
    assert_eq!(outcome.normalized_created, 2);

    let items = h
        .store
        .list_normalized_items(&Default::default())
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.location, "Remote");
        assert!(item.remote);
        assert_eq!(item.salary_min, Some(120_000));
        assert_eq!(item.salary_max, Some(150_000));
        assert!(item.skills.contains(&"Rust".to_string()));
        assert!(item.quality_score > 0.5);
    }

    // A second pass finds nothing left to do.
    let again = normalizer.normalize_pending(100).await.unwrap();
    assert_eq!(again.raw_items_processed, 0);
}
