use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobharvest", about = "Automated job listing ingestion pipeline")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// Number of concurrent scrape workers
    #[arg(long, env = "SCRAPE_WORKERS", default_value = "4")]
    pub workers: usize,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the API server and worker pool (default when no subcommand
    /// given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,

        /// Seconds between background normalization passes
        #[arg(long, env = "NORMALIZE_INTERVAL", default_value = "60")]
        normalize_interval: u64,
    },
    /// Run one normalization pass over unprocessed raw items and exit
    Normalize {
        /// Maximum raw items to process
        #[arg(long, default_value = "1000")]
        limit: i64,
    },
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            normalize_interval: std::env::var("NORMALIZE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }
}
