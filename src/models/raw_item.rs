use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An as-scraped, unnormalized job posting.
///
/// Created by the orchestrator after deduplication; the `processed` flag
/// is flipped exactly once by normalization and never reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub id: Uuid,
    pub source_id: Uuid,
    pub task_id: Uuid,
    pub source_url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_text: Option<String>,
    pub posted_at_text: Option<String>,
    /// Anything the strategy extracted beyond the named fields.
    pub extra: serde_json::Value,
    pub fingerprint: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}
