use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::source::SourceConfig;
use crate::service::{CreateSourceRequest, ScraperService, TestSourceReport};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list(
    State(service): State<Arc<ScraperService>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SourceConfig>>, AppError> {
    let sources = service.list_sources(params.active_only).await?;
    Ok(Json(sources))
}

pub async fn create(
    State(service): State<Arc<ScraperService>>,
    Json(input): Json<CreateSourceRequest>,
) -> Result<Json<SourceConfig>, AppError> {
    let source = service.create_source(input).await?;
    Ok(Json(source))
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub name: String,
    pub query: Option<String>,
    pub max_pages: Option<u32>,
}

pub async fn test(
    State(service): State<Arc<ScraperService>>,
    Json(input): Json<TestRequest>,
) -> Result<Json<TestSourceReport>, AppError> {
    let report = service
        .test_source(&input.name, input.query.as_deref(), input.max_pages.unwrap_or(1))
        .await?;
    Ok(Json(report))
}
