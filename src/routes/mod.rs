pub mod api;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::service::ScraperService;

pub fn router(service: Arc<ScraperService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .merge(api::router(service))
}

async fn healthz() -> &'static str {
    "ok"
}
