use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cleaned, structured, quality-scored job posting.
///
/// At most one exists per raw item; the store is checked for an existing
/// record before insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: Uuid,
    pub raw_item_id: Uuid,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: String,
    pub employment_type: Option<String>,
    pub experience_level: String,
    pub skills: Vec<String>,
    pub benefits: Vec<String>,
    pub remote: bool,
    pub posted_at: Option<DateTime<Utc>>,
    /// Weighted completeness score, always within [0, 1].
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}
