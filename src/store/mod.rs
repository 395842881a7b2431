// Persistence seam. The pipeline only ever talks to the `Store` trait;
// `PgStore` is the production adapter and `MemoryStore` backs tests and
// source sampling.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::normalized_item::NormalizedItem;
use crate::models::raw_item::RawItem;
use crate::models::source::{SourceConfig, SourceStats};
use crate::models::task::{ScrapeTask, TaskStatus};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Default, Deserialize)]
pub struct NormalizedFilters {
    pub search: Option<String>,
    pub remote: Option<bool>,
    pub min_quality: Option<f64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Sources
    async fn create_source(&self, source: &SourceConfig) -> Result<(), AppError>;
    async fn get_source(&self, id: Uuid) -> Result<Option<SourceConfig>, AppError>;
    async fn get_source_by_name(&self, name: &str) -> Result<Option<SourceConfig>, AppError>;
    async fn list_sources(&self, active_only: bool) -> Result<Vec<SourceConfig>, AppError>;
    async fn update_source_stats(&self, id: Uuid, stats: &SourceStats) -> Result<(), AppError>;

    // Tasks
    async fn create_task(&self, task: &ScrapeTask) -> Result<(), AppError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<ScrapeTask>, AppError>;
    async fn update_task(&self, task: &ScrapeTask) -> Result<(), AppError>;
    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<ScrapeTask>, AppError>;
    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<i64, AppError>;

    // Raw items
    async fn insert_raw_item(&self, item: &RawItem) -> Result<(), AppError>;
    async fn raw_item_exists(&self, source_id: Uuid, fingerprint: &str)
    -> Result<bool, AppError>;
    async fn find_unprocessed_raw_items(&self, limit: i64) -> Result<Vec<RawItem>, AppError>;
    async fn mark_raw_item_processed(&self, id: Uuid) -> Result<(), AppError>;
    async fn count_raw_items(&self, source_id: Option<Uuid>) -> Result<i64, AppError>;

    // Normalized items
    async fn insert_normalized_item(&self, item: &NormalizedItem) -> Result<(), AppError>;
    async fn normalized_exists_for_raw(&self, raw_item_id: Uuid) -> Result<bool, AppError>;
    async fn count_normalized_items(&self) -> Result<i64, AppError>;
    async fn list_normalized_items(
        &self,
        filters: &NormalizedFilters,
    ) -> Result<Vec<NormalizedItem>, AppError>;
}
