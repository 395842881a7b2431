use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::task::ScrapeTask;
use crate::service::{EnqueueRequest, EnqueueResponse, ScraperService};

pub async fn enqueue(
    State(service): State<Arc<ScraperService>>,
    Json(input): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    let response = service.enqueue_scrape(input).await?;
    Ok(Json(response))
}

pub async fn get(
    State(service): State<Arc<ScraperService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScrapeTask>, AppError> {
    let task = service.get_task(id).await?;
    Ok(Json(task))
}

pub async fn pause(
    State(service): State<Arc<ScraperService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = service.pause_task(id).await?;
    Ok(Json(serde_json::json!({
        "task_id": id,
        "status": status.as_str(),
    })))
}

pub async fn cancel(
    State(service): State<Arc<ScraperService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = service.cancel_task(id).await?;
    Ok(Json(serde_json::json!({
        "task_id": id,
        "status": status.as_str(),
    })))
}
