use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extraction strategy family declared on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Feed,
    Markup,
    Api,
    Hybrid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Feed => "feed",
            StrategyKind::Markup => "markup",
            StrategyKind::Api => "api",
            StrategyKind::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<StrategyKind> {
        match s {
            "feed" => Some(StrategyKind::Feed),
            "markup" => Some(StrategyKind::Markup),
            "api" => Some(StrategyKind::Api),
            "hybrid" => Some(StrategyKind::Hybrid),
            _ => None,
        }
    }
}

/// Hard ceiling on pagination regardless of configuration.
pub const MAX_PAGES_CAP: u32 = 50;

/// Running aggregate counters mutated only by orchestration outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub success_count: i64,
    pub failure_count: i64,
    pub total_items_scraped: i64,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }
}

/// Configuration of one third-party job source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: Uuid,
    pub name: String,
    pub strategy: StrategyKind,
    pub base_url: Option<String>,
    pub feed_url: Option<String>,
    /// Field name -> CSS selector (markup strategy).
    pub selectors: HashMap<String, String>,
    /// Seconds to sleep between page fetches. Never negative.
    pub rate_limit_delay: f64,
    pub max_pages: u32,
    /// Per-fetch HTTP timeout in seconds.
    pub request_timeout: u64,
    pub active: bool,
    pub stats: SourceStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceConfig {
    pub fn new(name: &str, strategy: StrategyKind) -> Self {
        let now = Utc::now();
        SourceConfig {
            id: Uuid::new_v4(),
            name: name.to_string(),
            strategy,
            base_url: None,
            feed_url: None,
            selectors: HashMap::new(),
            rate_limit_delay: 1.0,
            max_pages: 3,
            request_timeout: 30,
            active: true,
            stats: SourceStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective page limit, clamped to the global cap.
    pub fn effective_max_pages(&self) -> u32 {
        self.max_pages.clamp(1, MAX_PAGES_CAP)
    }

    pub fn selector(&self, field: &str) -> Option<&str> {
        self.selectors.get(field).map(String::as_str)
    }
}
