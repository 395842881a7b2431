use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::normalized_item::NormalizedItem;
use crate::models::raw_item::RawItem;
use crate::models::source::{SourceConfig, SourceStats, StrategyKind};
use crate::models::task::{ScrapeTask, TaskPriority, TaskStatus};
use crate::store::{NormalizedFilters, Store};

/// Postgres-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    strategy: String,
    base_url: Option<String>,
    feed_url: Option<String>,
    selectors: serde_json::Value,
    rate_limit_delay: f64,
    max_pages: i32,
    request_timeout: i64,
    active: bool,
    success_count: i64,
    failure_count: i64,
    total_items_scraped: i64,
    last_success_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SourceRow> for SourceConfig {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, AppError> {
        let strategy = StrategyKind::parse(&row.strategy)
            .ok_or_else(|| AppError::Internal(format!("unknown strategy '{}'", row.strategy)))?;
        let selectors: HashMap<String, String> =
            serde_json::from_value(row.selectors).unwrap_or_default();
        Ok(SourceConfig {
            id: row.id,
            name: row.name,
            strategy,
            base_url: row.base_url,
            feed_url: row.feed_url,
            selectors,
            rate_limit_delay: row.rate_limit_delay,
            max_pages: row.max_pages.max(1) as u32,
            request_timeout: row.request_timeout.max(1) as u64,
            active: row.active,
            stats: SourceStats {
                success_count: row.success_count,
                failure_count: row.failure_count,
                total_items_scraped: row.total_items_scraped,
                last_success_at: row.last_success_at,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    source_id: Uuid,
    priority: String,
    status: String,
    mode: String,
    items_found: i64,
    items_processed: i64,
    items_saved: i64,
    duplicates: i64,
    error: Option<String>,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for ScrapeTask {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self, AppError> {
        let priority = TaskPriority::parse(&row.priority)
            .ok_or_else(|| AppError::Internal(format!("unknown priority '{}'", row.priority)))?;
        let status = TaskStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unknown status '{}'", row.status)))?;
        Ok(ScrapeTask {
            id: row.id,
            source_id: row.source_id,
            priority,
            status,
            mode: row.mode,
            items_found: row.items_found,
            items_processed: row.items_processed,
            items_saved: row.items_saved,
            duplicates: row.duplicates,
            error: row.error,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RawItemRow {
    id: Uuid,
    source_id: Uuid,
    task_id: Uuid,
    source_url: String,
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    description: Option<String>,
    salary_text: Option<String>,
    posted_at_text: Option<String>,
    extra: serde_json::Value,
    fingerprint: String,
    processed: bool,
    created_at: DateTime<Utc>,
}

impl From<RawItemRow> for RawItem {
    fn from(row: RawItemRow) -> Self {
        RawItem {
            id: row.id,
            source_id: row.source_id,
            task_id: row.task_id,
            source_url: row.source_url,
            title: row.title,
            company: row.company,
            location: row.location,
            description: row.description,
            salary_text: row.salary_text,
            posted_at_text: row.posted_at_text,
            extra: row.extra,
            fingerprint: row.fingerprint,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NormalizedRow {
    id: Uuid,
    raw_item_id: Uuid,
    title: String,
    company: String,
    location: String,
    description: String,
    salary_min: Option<i64>,
    salary_max: Option<i64>,
    salary_currency: String,
    employment_type: Option<String>,
    experience_level: String,
    skills: serde_json::Value,
    benefits: serde_json::Value,
    remote: bool,
    posted_at: Option<DateTime<Utc>>,
    quality_score: f64,
    created_at: DateTime<Utc>,
}

impl From<NormalizedRow> for NormalizedItem {
    fn from(row: NormalizedRow) -> Self {
        NormalizedItem {
            id: row.id,
            raw_item_id: row.raw_item_id,
            title: row.title,
            company: row.company,
            location: row.location,
            description: row.description,
            salary_min: row.salary_min,
            salary_max: row.salary_max,
            salary_currency: row.salary_currency,
            employment_type: row.employment_type,
            experience_level: row.experience_level,
            skills: serde_json::from_value(row.skills).unwrap_or_default(),
            benefits: serde_json::from_value(row.benefits).unwrap_or_default(),
            remote: row.remote,
            posted_at: row.posted_at,
            quality_score: row.quality_score,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_source(&self, source: &SourceConfig) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sources (id, name, strategy, base_url, feed_url, selectors, rate_limit_delay, max_pages, request_timeout, active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(source.strategy.as_str())
        .bind(&source.base_url)
        .bind(&source.feed_url)
        .bind(serde_json::to_value(&source.selectors).unwrap_or_default())
        .bind(source.rate_limit_delay)
        .bind(source.max_pages as i32)
        .bind(source.request_timeout as i64)
        .bind(source.active)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<SourceConfig>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SourceConfig::try_from).transpose()
    }

    async fn get_source_by_name(&self, name: &str) -> Result<Option<SourceConfig>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SourceConfig::try_from).transpose()
    }

    async fn list_sources(&self, active_only: bool) -> Result<Vec<SourceConfig>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            "SELECT * FROM sources WHERE ($1 = FALSE OR active) ORDER BY name",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SourceConfig::try_from).collect()
    }

    async fn update_source_stats(&self, id: Uuid, stats: &SourceStats) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE sources SET success_count = $2, failure_count = $3, total_items_scraped = $4, last_success_at = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stats.success_count)
        .bind(stats.failure_count)
        .bind(stats.total_items_scraped)
        .bind(stats.last_success_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Source {id} not found")));
        }
        Ok(())
    }

    async fn create_task(&self, task: &ScrapeTask) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO scrape_tasks (id, source_id, priority, status, mode, items_found, items_processed, items_saved, duplicates, error, submitted_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(task.id)
        .bind(task.source_id)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.mode)
        .bind(task.items_found)
        .bind(task.items_processed)
        .bind(task.items_saved)
        .bind(task.duplicates)
        .bind(&task.error)
        .bind(task.submitted_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM scrape_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ScrapeTask::try_from).transpose()
    }

    async fn update_task(&self, task: &ScrapeTask) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE scrape_tasks SET status = $2, items_found = $3, items_processed = $4, items_saved = $5, duplicates = $6, error = $7, started_at = $8, completed_at = $9 WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(task.items_found)
        .bind(task.items_processed)
        .bind(task.items_saved)
        .bind(task.duplicates)
        .bind(&task.error)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }
        Ok(())
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<ScrapeTask>, AppError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM scrape_tasks WHERE status = $1 ORDER BY submitted_at LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ScrapeTask::try_from).collect()
    }

    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<i64, AppError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM scrape_tasks WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn insert_raw_item(&self, item: &RawItem) -> Result<(), AppError> {
        // ON CONFLICT keeps writes idempotent under the per-source
        // fingerprint uniqueness constraint.
        sqlx::query(
            "INSERT INTO raw_items (id, source_id, task_id, source_url, title, company, location, description, salary_text, posted_at_text, extra, fingerprint, processed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (source_id, fingerprint) DO NOTHING",
        )
        .bind(item.id)
        .bind(item.source_id)
        .bind(item.task_id)
        .bind(&item.source_url)
        .bind(&item.title)
        .bind(&item.company)
        .bind(&item.location)
        .bind(&item.description)
        .bind(&item.salary_text)
        .bind(&item.posted_at_text)
        .bind(&item.extra)
        .bind(&item.fingerprint)
        .bind(item.processed)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raw_item_exists(
        &self,
        source_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM raw_items WHERE source_id = $1 AND fingerprint = $2)",
        )
        .bind(source_id)
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn find_unprocessed_raw_items(&self, limit: i64) -> Result<Vec<RawItem>, AppError> {
        let rows = sqlx::query_as::<_, RawItemRow>(
            "SELECT * FROM raw_items WHERE NOT processed ORDER BY created_at LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RawItem::from).collect())
    }

    async fn mark_raw_item_processed(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE raw_items SET processed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Raw item {id} not found")));
        }
        Ok(())
    }

    async fn count_raw_items(&self, source_id: Option<Uuid>) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM raw_items WHERE ($1::uuid IS NULL OR source_id = $1)",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn insert_normalized_item(&self, item: &NormalizedItem) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO normalized_items (id, raw_item_id, title, company, location, description, salary_min, salary_max, salary_currency, employment_type, experience_level, skills, benefits, remote, posted_at, quality_score, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (raw_item_id) DO NOTHING",
        )
        .bind(item.id)
        .bind(item.raw_item_id)
        .bind(&item.title)
        .bind(&item.company)
        .bind(&item.location)
        .bind(&item.description)
        .bind(item.salary_min)
        .bind(item.salary_max)
        .bind(&item.salary_currency)
        .bind(&item.employment_type)
        .bind(&item.experience_level)
        .bind(serde_json::to_value(&item.skills).unwrap_or_default())
        .bind(serde_json::to_value(&item.benefits).unwrap_or_default())
        .bind(item.remote)
        .bind(item.posted_at)
        .bind(item.quality_score)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn normalized_exists_for_raw(&self, raw_item_id: Uuid) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM normalized_items WHERE raw_item_id = $1)",
        )
        .bind(raw_item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn count_normalized_items(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM normalized_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn list_normalized_items(
        &self,
        filters: &NormalizedFilters,
    ) -> Result<Vec<NormalizedItem>, AppError> {
        let per_page = filters.per_page.unwrap_or(50).clamp(1, 100);
        let offset = (filters.page.unwrap_or(1) - 1).max(0) * per_page;

        let rows = sqlx::query_as::<_, NormalizedRow>(
            "SELECT * FROM normalized_items \
             WHERE ($1::text IS NULL OR title ILIKE '%' || $1 || '%') \
               AND ($2::boolean IS NULL OR remote = $2) \
               AND ($3::float8 IS NULL OR quality_score >= $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5",
        )
        .bind(&filters.search)
        .bind(filters.remote)
        .bind(filters.min_quality)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(NormalizedItem::from).collect())
    }
}
