//! Application service tying the store, queue, monitor and orchestrator
//! together behind one API the HTTP handlers call into.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::source::{SourceConfig, StrategyKind};
use crate::models::task::{ScrapeTask, TaskPriority, TaskStatus};
use crate::monitor::{ErrorEntry, Monitor, MonitorStatistics, SourceHealth};
use crate::normalize::{NormalizationOutcome, Normalizer};
use crate::queue::{QueueStatus, TaskQueue};
use crate::scrape::ExtractedItem;
use crate::scrape::orchestrator::Orchestrator;
use crate::store::{NormalizedFilters, Store};

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub name: String,
    pub strategy: String,
    pub base_url: Option<String>,
    pub feed_url: Option<String>,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    pub rate_limit_delay: Option<f64>,
    pub max_pages: Option<u32>,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub source_ids: Vec<Uuid>,
    /// 0 = low .. 3 = urgent. Defaults to normal.
    pub priority: Option<u8>,
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedTask {
    pub source_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RejectedSource {
    pub source_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub accepted: Vec<EnqueuedTask>,
    pub rejected: Vec<RejectedSource>,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatistics {
    pub queue: QueueStatus,
    pub monitor: MonitorStatistics,
    pub sources: Vec<SourceHealth>,
    pub tasks: HashMap<String, i64>,
    pub raw_items: i64,
    pub normalized_items: i64,
}

#[derive(Debug, Serialize)]
pub struct SampleItem {
    pub source_url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_text: Option<String>,
}

impl From<&ExtractedItem> for SampleItem {
    fn from(item: &ExtractedItem) -> Self {
        SampleItem {
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            company: item.company.clone(),
            location: item.location.clone(),
            salary_text: item.salary_text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TestSourceReport {
    pub source: String,
    pub items_found: usize,
    pub sample: Vec<SampleItem>,
}

pub struct ScraperService {
    store: Arc<dyn Store>,
    queue: Arc<TaskQueue>,
    monitor: Arc<Monitor>,
    orchestrator: Arc<Orchestrator>,
    normalizer: Normalizer,
}

impl ScraperService {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<TaskQueue>,
        monitor: Arc<Monitor>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        ScraperService {
            normalizer: Normalizer::new(store.clone()),
            store,
            queue,
            monitor,
            orchestrator,
        }
    }

    pub async fn create_source(&self, req: CreateSourceRequest) -> Result<SourceConfig, AppError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("source name must not be empty".to_string()));
        }
        let strategy = StrategyKind::parse(&req.strategy).ok_or_else(|| {
            AppError::BadRequest(format!("unknown strategy '{}'", req.strategy))
        })?;
        if self.store.get_source_by_name(name).await?.is_some() {
            return Err(AppError::BadRequest(format!(
                "source '{name}' already exists"
            )));
        }
        if req.rate_limit_delay.is_some_and(|d| d < 0.0) {
            return Err(AppError::BadRequest(
                "rate_limit_delay must not be negative".to_string(),
            ));
        }

        let mut source = SourceConfig::new(name, strategy);
        source.base_url = req.base_url.filter(|u| !u.is_empty());
        source.feed_url = req.feed_url.filter(|u| !u.is_empty());
        source.selectors = req.selectors;
        if let Some(delay) = req.rate_limit_delay {
            source.rate_limit_delay = delay;
        }
        if let Some(pages) = req.max_pages {
            source.max_pages = pages;
        }
        if let Some(timeout) = req.request_timeout {
            source.request_timeout = timeout;
        }

        self.store.create_source(&source).await?;
        tracing::info!("Registered source '{}' ({})", source.name, strategy.as_str());
        Ok(source)
    }

    pub async fn list_sources(&self, active_only: bool) -> Result<Vec<SourceConfig>, AppError> {
        self.store.list_sources(active_only).await
    }

    /// Queue scrape tasks for a set of sources. Sources that are unknown,
    /// inactive or already busy are reported back rather than failing the
    /// whole request.
    pub async fn enqueue_scrape(&self, req: EnqueueRequest) -> Result<EnqueueResponse, AppError> {
        if req.source_ids.is_empty() {
            return Err(AppError::BadRequest("no source ids given".to_string()));
        }
        let priority = match req.priority {
            None => TaskPriority::Normal,
            Some(n) => TaskPriority::from_index(n).ok_or_else(|| {
                AppError::BadRequest(format!("priority must be 0-3, got {n}"))
            })?,
        };
        let mode = req.mode.as_deref().unwrap_or("manual");

        let mut response = EnqueueResponse {
            accepted: Vec::new(),
            rejected: Vec::new(),
        };

        for source_id in req.source_ids {
            let Some(source) = self.store.get_source(source_id).await? else {
                response.rejected.push(RejectedSource {
                    source_id,
                    reason: "unknown source".to_string(),
                });
                continue;
            };
            if !source.active {
                response.rejected.push(RejectedSource {
                    source_id,
                    reason: "source is inactive".to_string(),
                });
                continue;
            }
            match self.queue.submit(&source, priority, mode).await {
                Ok(task_id) => response.accepted.push(EnqueuedTask { source_id, task_id }),
                Err(AppError::SourceBusy(name)) => response.rejected.push(RejectedSource {
                    source_id,
                    reason: format!("source '{name}' already has a queued or running task"),
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(response)
    }

    pub async fn pause_task(&self, task_id: Uuid) -> Result<TaskStatus, AppError> {
        self.queue.pause(task_id).await
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> Result<TaskStatus, AppError> {
        self.queue.cancel(task_id).await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<ScrapeTask, AppError> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        self.monitor.recent_errors(limit)
    }

    pub async fn statistics(&self) -> Result<PipelineStatistics, AppError> {
        let mut tasks = HashMap::new();
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Paused,
        ] {
            let count = self.store.count_tasks_by_status(status).await?;
            tasks.insert(status.as_str().to_string(), count);
        }

        Ok(PipelineStatistics {
            queue: self.queue.status(),
            monitor: self.monitor.statistics(),
            sources: self.monitor.health_report(),
            tasks,
            raw_items: self.store.count_raw_items(None).await?,
            normalized_items: self.store.count_normalized_items().await?,
        })
    }

    /// Run a small non-persisting scrape against a configured source and
    /// return the first few extracted items. A `{query}` placeholder in
    /// the source URLs is substituted when a query is given.
    pub async fn test_source(
        &self,
        name: &str,
        query: Option<&str>,
        max_pages: u32,
    ) -> Result<TestSourceReport, AppError> {
        let mut source = self
            .store
            .get_source_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source '{name}'")))?;

        if let Some(query) = query {
            source.base_url = source.base_url.map(|u| u.replace("{query}", query));
            source.feed_url = source.feed_url.map(|u| u.replace("{query}", query));
        }

        let items = self.orchestrator.sample(&source, max_pages).await?;
        Ok(TestSourceReport {
            source: source.name,
            items_found: items.len(),
            sample: items.iter().take(3).map(SampleItem::from).collect(),
        })
    }

    pub async fn list_normalized(
        &self,
        filters: &NormalizedFilters,
    ) -> Result<Vec<crate::models::normalized_item::NormalizedItem>, AppError> {
        self.store.list_normalized_items(filters).await
    }

    /// One normalization pass; used by the background loop and the
    /// `normalize` subcommand.
    pub async fn run_normalization(&self, limit: i64) -> Result<NormalizationOutcome, AppError> {
        self.normalizer.normalize_pending(limit).await
    }
}
