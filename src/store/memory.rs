use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::normalized_item::NormalizedItem;
use crate::models::raw_item::RawItem;
use crate::models::source::{SourceConfig, SourceStats};
use crate::models::task::{ScrapeTask, TaskStatus};
use crate::store::{NormalizedFilters, Store};

/// In-memory store. Used by tests and by `test_source` sampling runs that
/// must not touch production data.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<Uuid, SourceConfig>,
    tasks: HashMap<Uuid, ScrapeTask>,
    raw_items: Vec<RawItem>,
    normalized_items: Vec<NormalizedItem>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_source(&self, source: &SourceConfig) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if inner.sources.values().any(|s| s.name == source.name) {
            return Err(AppError::BadRequest(format!(
                "Source '{}' already exists",
                source.name
            )));
        }
        inner.sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<SourceConfig>, AppError> {
        Ok(self.lock()?.sources.get(&id).cloned())
    }

    async fn get_source_by_name(&self, name: &str) -> Result<Option<SourceConfig>, AppError> {
        Ok(self
            .lock()?
            .sources
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_sources(&self, active_only: bool) -> Result<Vec<SourceConfig>, AppError> {
        let inner = self.lock()?;
        let mut sources: Vec<SourceConfig> = inner
            .sources
            .values()
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn update_source_stats(&self, id: Uuid, stats: &SourceStats) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let source = inner
            .sources
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        source.stats = stats.clone();
        source.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn create_task(&self, task: &ScrapeTask) -> Result<(), AppError> {
        self.lock()?.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &ScrapeTask) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if !inner.tasks.contains_key(&task.id) {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<ScrapeTask>, AppError> {
        let inner = self.lock()?;
        let mut tasks: Vec<ScrapeTask> = inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.submitted_at);
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<i64, AppError> {
        Ok(self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count() as i64)
    }

    async fn insert_raw_item(&self, item: &RawItem) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        // Idempotent-by-construction: existence check before insert.
        if inner
            .raw_items
            .iter()
            .any(|r| r.source_id == item.source_id && r.fingerprint == item.fingerprint)
        {
            return Ok(());
        }
        inner.raw_items.push(item.clone());
        Ok(())
    }

    async fn raw_item_exists(
        &self,
        source_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .lock()?
            .raw_items
            .iter()
            .any(|r| r.source_id == source_id && r.fingerprint == fingerprint))
    }

    async fn find_unprocessed_raw_items(&self, limit: i64) -> Result<Vec<RawItem>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .raw_items
            .iter()
            .filter(|r| !r.processed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_raw_item_processed(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let item = inner
            .raw_items
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Raw item {id} not found")))?;
        item.processed = true;
        Ok(())
    }

    async fn count_raw_items(&self, source_id: Option<Uuid>) -> Result<i64, AppError> {
        Ok(self
            .lock()?
            .raw_items
            .iter()
            .filter(|r| source_id.is_none_or(|id| r.source_id == id))
            .count() as i64)
    }

    async fn insert_normalized_item(&self, item: &NormalizedItem) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if inner
            .normalized_items
            .iter()
            .any(|n| n.raw_item_id == item.raw_item_id)
        {
            return Ok(());
        }
        inner.normalized_items.push(item.clone());
        Ok(())
    }

    async fn normalized_exists_for_raw(&self, raw_item_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .lock()?
            .normalized_items
            .iter()
            .any(|n| n.raw_item_id == raw_item_id))
    }

    async fn count_normalized_items(&self) -> Result<i64, AppError> {
        Ok(self.lock()?.normalized_items.len() as i64)
    }

    async fn list_normalized_items(
        &self,
        filters: &NormalizedFilters,
    ) -> Result<Vec<NormalizedItem>, AppError> {
        let inner = self.lock()?;
        let per_page = filters.per_page.unwrap_or(50).clamp(1, 100) as usize;
        let offset = ((filters.page.unwrap_or(1) - 1).max(0) as usize) * per_page;

        let items = inner
            .normalized_items
            .iter()
            .filter(|n| {
                filters
                    .search
                    .as_deref()
                    .is_none_or(|q| n.title.to_lowercase().contains(&q.to_lowercase()))
                    && filters.remote.is_none_or(|r| n.remote == r)
                    && filters.min_quality.is_none_or(|q| n.quality_score >= q)
            })
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect();
        Ok(items)
    }
}
