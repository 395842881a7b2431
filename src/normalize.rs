//! Rule-based normalization of raw items into structured, quality-scored
//! records.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::normalized_item::NormalizedItem;
use crate::models::raw_item::RawItem;
use crate::store::Store;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,()&/]").expect("static regex"));
static SALARY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("static regex"));

const LOCATION_SYNONYMS: &[(&str, &str)] = &[
    ("remote", "Remote"),
    ("work from home", "Remote"),
    ("wfh", "Remote"),
    ("anywhere", "Remote"),
    ("usa", "United States"),
    ("us", "United States"),
    ("united states", "United States"),
    ("uk", "United Kingdom"),
    ("united kingdom", "United Kingdom"),
    ("ca", "Canada"),
    ("canada", "Canada"),
];

const EMPLOYMENT_TYPES: &[(&str, &str)] = &[
    ("full-time", "Full-time"),
    ("fulltime", "Full-time"),
    ("full time", "Full-time"),
    ("part-time", "Part-time"),
    ("parttime", "Part-time"),
    ("part time", "Part-time"),
    ("contractor", "Contract"),
    ("contract", "Contract"),
    ("freelance", "Freelance"),
    ("temporary", "Temporary"),
    ("temp", "Temporary"),
    ("internship", "Internship"),
    ("intern", "Internship"),
];

const SKILLS: &[(&str, &[&str])] = &[
    ("Python", &["python", "django", "flask", "fastapi"]),
    ("Java", &["java ", "spring", "hibernate", "maven"]),
    ("Javascript", &["javascript", "node.js", "nodejs", "express"]),
    ("Typescript", &["typescript"]),
    ("Rust", &["rust", "tokio", "actix"]),
    ("Go", &["golang", "go "]),
    ("React", &["react"]),
    ("Angular", &["angular"]),
    ("Vue", &["vue"]),
    ("Sql", &["sql", "mysql", "postgresql", "postgres", "sqlite"]),
    ("Mongodb", &["mongodb", "mongo"]),
    ("Docker", &["docker", "containerization"]),
    ("Kubernetes", &["kubernetes", "k8s"]),
    ("Aws", &["aws", "amazon web services", "ec2", "s3", "lambda"]),
    ("Azure", &["azure"]),
    ("Gcp", &["gcp", "google cloud"]),
    ("Git", &["git", "github", "gitlab"]),
    ("Linux", &["linux", "unix"]),
    ("Html", &["html"]),
    ("Css", &["css", "sass", "scss"]),
    ("Rest", &["rest api", "restful", "rest "]),
    ("Graphql", &["graphql"]),
    ("Microservices", &["microservice"]),
    ("Agile", &["agile", "scrum", "kanban"]),
    ("Ci/Cd", &["ci/cd", "continuous integration", "jenkins"]),
];

const BENEFITS: &[(&str, &[&str])] = &[
    ("health insurance", &["health insurance", "medical insurance", "healthcare"]),
    ("dental insurance", &["dental insurance", "dental coverage"]),
    ("vision insurance", &["vision insurance", "vision coverage"]),
    ("401k", &["401k", "401(k)", "retirement plan"]),
    ("paid time off", &["pto", "paid time off", "vacation days"]),
    ("remote work", &["remote work", "work from home", "flexible location"]),
    ("flexible hours", &["flexible hours", "flexible schedule"]),
    ("stock options", &["stock options", "equity", "stock grants"]),
    ("gym membership", &["gym membership", "fitness"]),
    ("free lunch", &["free lunch", "free meals", "catered meals"]),
];

const REMOTE_KEYWORDS: &[&str] = &[
    "remote",
    "work from home",
    "wfh",
    "telecommute",
    "distributed",
    "anywhere",
    "location independent",
    "home office",
];

/// Skill lists are capped so one keyword-stuffed posting cannot dominate.
const MAX_SKILLS: usize = 15;

/// Collapse whitespace and strip unusual characters, keeping basic
/// punctuation.
pub fn clean_text(text: &str) -> String {
    let stripped = DISALLOWED.replace_all(text.trim(), "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Extract visible text from an HTML fragment, then clean it.
pub fn strip_markup(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    clean_text(&text)
}

/// Map a location through the synonym table. Synonyms match on word
/// boundaries so "Austin" is not read as "us".
pub fn normalize_location(location: &str) -> String {
    let cleaned = clean_text(location);
    if cleaned.is_empty() {
        return String::new();
    }
    let lower = cleaned.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == ',' || c == '/')
        .filter(|t| !t.is_empty())
        .collect();

    for (pattern, replacement) in LOCATION_SYNONYMS {
        let matched = if pattern.contains(' ') {
            lower.contains(pattern)
        } else {
            tokens.iter().any(|t| t == pattern)
        };
        if matched {
            return (*replacement).to_string();
        }
    }
    cleaned
}

/// Scan salary text for one or two numeric tokens.
pub fn parse_salary(text: &str) -> (Option<i64>, Option<i64>, String) {
    let mut currency = "USD".to_string();
    if text.is_empty() {
        return (None, None, currency);
    }

    let lower = text.to_lowercase();
    if text.contains('€') || lower.contains("eur") {
        currency = "EUR".to_string();
    } else if text.contains('£') || lower.contains("gbp") {
        currency = "GBP".to_string();
    }

    let numbers: Vec<i64> = SALARY_NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse().ok())
        .collect();

    match numbers.as_slice() {
        [] => (None, None, currency),
        [single] => {
            if lower.contains("up to") || lower.contains("max") {
                (None, Some(*single), currency)
            } else {
                (Some(*single), None, currency)
            }
        }
        [min, max, ..] => (Some(*min), Some(*max), currency),
    }
}

pub fn normalize_employment_type(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if lower.is_empty() {
        return None;
    }
    EMPLOYMENT_TYPES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, value)| (*value).to_string())
}

pub fn extract_experience_level(title: &str, description: &str) -> String {
    let text = format!("{} {}", title, description).to_lowercase();
    if ["senior", "sr.", "lead", "principal", "architect"]
        .iter()
        .any(|w| text.contains(w))
    {
        "Senior".to_string()
    } else if ["junior", "jr.", "entry", "graduate", "associate"]
        .iter()
        .any(|w| text.contains(w))
    {
        "Junior".to_string()
    } else if ["intern", "internship", "trainee"].iter().any(|w| text.contains(w)) {
        "Internship".to_string()
    } else {
        "Mid-level".to_string()
    }
}

pub fn extract_skills(title: &str, description: &str) -> Vec<String> {
    let text = format!("{} {} ", title, description).to_lowercase();
    SKILLS
        .iter()
        .filter(|(_, variations)| variations.iter().any(|v| text.contains(v)))
        .map(|(name, _)| (*name).to_string())
        .take(MAX_SKILLS)
        .collect()
}

pub fn extract_benefits(description: &str) -> Vec<String> {
    let text = description.to_lowercase();
    BENEFITS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(name, _)| (*name).to_string())
        .collect()
}

pub fn detect_remote(title: &str, description: &str, location: &str) -> bool {
    let text = format!("{} {} {}", title, description, location).to_lowercase();
    REMOTE_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Posted-date text in common date formats, including RSS pubDate.
pub fn parse_posted_date(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// Weighted completeness score, clamped to [0, 1]. Components are capped
/// independently: title 20%, company 15%, location 15%, description 25%,
/// salary 10%, skills 10%, benefits 5%.
pub fn quality_score(item: &NormalizedItem) -> f64 {
    let mut score: f64 = 0.0;

    let title_len = item.title.len();
    if (10..=100).contains(&title_len) {
        score += 0.2;
    } else if title_len > 5 {
        score += 0.1;
    }

    if !item.company.is_empty() {
        score += 0.15;
    }
    if !item.location.is_empty() {
        score += 0.15;
    }

    let desc_len = item.description.len();
    if desc_len > 200 {
        score += 0.25;
    } else if desc_len > 50 {
        score += 0.15;
    } else if desc_len > 10 {
        score += 0.05;
    }

    if item.salary_min.is_some() || item.salary_max.is_some() {
        score += 0.1;
    }

    match item.skills.len() {
        0 => {}
        1..=2 => score += 0.05,
        _ => score += 0.1,
    }

    match item.benefits.len() {
        0 => {}
        1 => score += 0.025,
        _ => score += 0.05,
    }

    score.clamp(0.0, 1.0)
}

/// Convert one raw item into a normalized record. Returns `None` when no
/// usable title is present.
pub fn normalize_raw(raw: &RawItem) -> Option<NormalizedItem> {
    let title = clean_text(raw.title.as_deref().unwrap_or(""));
    if title.is_empty() {
        return None;
    }

    let company = clean_text(raw.company.as_deref().unwrap_or(""));
    let location = normalize_location(raw.location.as_deref().unwrap_or(""));
    let description = strip_markup(raw.description.as_deref().unwrap_or(""));
    let (salary_min, salary_max, salary_currency) =
        parse_salary(raw.salary_text.as_deref().unwrap_or(""));

    let employment_type = raw
        .extra
        .get("employment_type")
        .and_then(|v| v.as_str())
        .and_then(normalize_employment_type)
        .or_else(|| normalize_employment_type(&format!("{} {}", title, description)));

    let mut item = NormalizedItem {
        id: Uuid::new_v4(),
        raw_item_id: raw.id,
        experience_level: extract_experience_level(&title, &description),
        skills: extract_skills(&title, &description),
        benefits: extract_benefits(&description),
        remote: detect_remote(&title, &description, &location),
        posted_at: raw
            .posted_at_text
            .as_deref()
            .and_then(parse_posted_date),
        title,
        company,
        location,
        description,
        salary_min,
        salary_max,
        salary_currency,
        employment_type,
        quality_score: 0.0,
        created_at: Utc::now(),
    };
    item.quality_score = quality_score(&item);
    Some(item)
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct NormalizationOutcome {
    pub raw_items_processed: i64,
    pub normalized_created: i64,
    pub skipped_no_title: i64,
    pub already_normalized: i64,
    pub errors: i64,
    pub average_quality: f64,
}

/// Consumes not-yet-processed raw items and produces normalized records.
pub struct Normalizer {
    store: Arc<dyn Store>,
}

impl Normalizer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Normalizer { store }
    }

    /// One normalization pass over unprocessed raw items. Item-level
    /// failures are counted and skipped; the raw item is marked processed
    /// regardless of whether normalization produced an output.
    pub async fn normalize_pending(&self, limit: i64) -> Result<NormalizationOutcome, AppError> {
        let pending = self.store.find_unprocessed_raw_items(limit).await?;
        let mut outcome = NormalizationOutcome::default();
        let mut quality_sum = 0.0;

        for raw in &pending {
            outcome.raw_items_processed += 1;

            // At most one normalized item per raw item.
            if self.store.normalized_exists_for_raw(raw.id).await? {
                outcome.already_normalized += 1;
                self.store.mark_raw_item_processed(raw.id).await?;
                continue;
            }

            match normalize_raw(raw) {
                Some(item) => {
                    quality_sum += item.quality_score;
                    match self.store.insert_normalized_item(&item).await {
                        Ok(()) => outcome.normalized_created += 1,
                        Err(e) => {
                            tracing::error!("Failed to persist normalized item: {e}");
                            outcome.errors += 1;
                        }
                    }
                }
                None => outcome.skipped_no_title += 1,
            }
            self.store.mark_raw_item_processed(raw.id).await?;
        }

        if outcome.normalized_created > 0 {
            outcome.average_quality = quality_sum / outcome.normalized_created as f64;
        }
        tracing::info!(
            "Normalization pass: {} processed, {} created, avg quality {:.2}",
            outcome.raw_items_processed,
            outcome.normalized_created,
            outcome.average_quality
        );
        Ok(outcome)
    }
}
