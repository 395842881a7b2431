use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::normalized_item::NormalizedItem;
use crate::normalize::NormalizationOutcome;
use crate::service::ScraperService;
use crate::store::NormalizedFilters;

pub async fn list(
    State(service): State<Arc<ScraperService>>,
    Query(filters): Query<NormalizedFilters>,
) -> Result<Json<Vec<NormalizedItem>>, AppError> {
    let items = service.list_normalized(&filters).await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct NormalizeParams {
    pub limit: Option<i64>,
}

pub async fn run_normalization(
    State(service): State<Arc<ScraperService>>,
    Query(params): Query<NormalizeParams>,
) -> Result<Json<NormalizationOutcome>, AppError> {
    let outcome = service.run_normalization(params.limit.unwrap_or(500)).await?;
    Ok(Json(outcome))
}
