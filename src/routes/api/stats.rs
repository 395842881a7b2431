use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::error::AppError;
use crate::monitor::ErrorEntry;
use crate::queue::QueueStatus;
use crate::service::{PipelineStatistics, ScraperService};

pub async fn queue_status(
    State(service): State<Arc<ScraperService>>,
) -> Json<QueueStatus> {
    Json(service.queue_status())
}

pub async fn statistics(
    State(service): State<Arc<ScraperService>>,
) -> Result<Json<PipelineStatistics>, AppError> {
    let stats = service.statistics().await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ErrorParams {
    pub limit: Option<usize>,
}

pub async fn recent_errors(
    State(service): State<Arc<ScraperService>>,
    Query(params): Query<ErrorParams>,
) -> Json<Vec<ErrorEntry>> {
    Json(service.recent_errors(params.limit.unwrap_or(50)))
}
