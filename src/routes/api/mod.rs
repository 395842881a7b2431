pub mod items;
pub mod sources;
pub mod stats;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::service::ScraperService;

pub fn router(service: Arc<ScraperService>) -> Router {
    let api = Router::new()
        // Sources
        .route("/sources", get(sources::list).post(sources::create))
        .route("/sources/test", post(sources::test))
        // Scrape tasks
        .route("/scrape/enqueue", post(tasks::enqueue))
        .route("/tasks/{id}", get(tasks::get))
        .route("/tasks/{id}/pause", post(tasks::pause))
        .route("/tasks/{id}/cancel", post(tasks::cancel))
        // Queue and statistics
        .route("/queue/status", get(stats::queue_status))
        .route("/statistics", get(stats::statistics))
        .route("/errors", get(stats::recent_errors))
        // Normalized output
        .route("/items", get(items::list))
        .route("/normalize/run", post(items::run_normalization))
        .with_state(service);

    Router::new().nest("/api/v1", api)
}
