use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use jobharvest::config::{Command, Config};
use jobharvest::monitor::Monitor;
use jobharvest::queue::TaskQueue;
use jobharvest::scrape::orchestrator::Orchestrator;
use jobharvest::scrape::{Fetcher, ScraperRegistry};
use jobharvest::service::ScraperService;
use jobharvest::store::{PgStore, Store};
use jobharvest::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jobharvest=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let monitor = Arc::new(Monitor::new());
    let fetcher = Fetcher::new()?;
    // Deployments plug specialized per-source scrapers in here.
    let registry = ScraperRegistry::new();
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        registry,
        fetcher,
        monitor.clone(),
    ));
    let queue = Arc::new(TaskQueue::new(
        store.clone(),
        orchestrator.clone(),
        monitor.clone(),
        config.workers,
    ));
    let service = Arc::new(ScraperService::new(
        store,
        queue.clone(),
        monitor,
        orchestrator,
    ));

    match config.resolved_command() {
        Command::Serve {
            listen_addr,
            normalize_interval,
        } => {
            queue.start();

            let background = service.clone();
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(normalize_interval.max(1)));
                loop {
                    ticker.tick().await;
                    match background.run_normalization(500).await {
                        Ok(outcome) if outcome.raw_items_processed > 0 => {
                            tracing::info!(
                                "Background normalization: {} processed, {} created",
                                outcome.raw_items_processed,
                                outcome.normalized_created
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Background normalization failed: {e}"),
                    }
                }
            });

            let app = routes::router(service)
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(listener, app).await?;
        }
        Command::Normalize { limit } => {
            let outcome = service.run_normalization(limit).await?;
            tracing::info!(
                "Normalized {} of {} raw items (avg quality {:.2})",
                outcome.normalized_created,
                outcome.raw_items_processed,
                outcome.average_quality
            );
        }
    }

    Ok(())
}
