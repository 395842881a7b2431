//! Content fingerprinting and duplicate filtering.
//!
//! Duplicates are detected at two levels: within a single batch (a run may
//! revisit the same listing across paginated pages or RSS + HTML fallbacks)
//! and against all persisted raw items for the source.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::scrape::ExtractedItem;
use crate::store::Store;

/// Only the leading part of the description participates in the
/// fingerprint; trailing boilerplate varies between renderings.
const DESCRIPTION_PREFIX_LEN: usize = 200;

fn normalize_component(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic content fingerprint over (title, source URL, description
/// prefix). Case and whitespace differences do not change the result.
pub fn fingerprint(title: &str, source_url: &str, description: &str) -> String {
    let desc: String = normalize_component(description)
        .chars()
        .take(DESCRIPTION_PREFIX_LEN)
        .collect();
    let content = format!(
        "{}|{}|{}",
        normalize_component(title),
        normalize_component(source_url),
        desc
    );
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn fingerprint_item(item: &ExtractedItem) -> String {
    fingerprint(
        item.title.as_deref().unwrap_or(""),
        &item.source_url,
        item.description.as_deref().unwrap_or(""),
    )
}

pub struct DedupEngine {
    store: Arc<dyn Store>,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        DedupEngine { store }
    }

    /// Checks persisted raw items, scoped to one source (all history).
    pub async fn is_duplicate(
        &self,
        source_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, AppError> {
        self.store.raw_item_exists(source_id, fingerprint).await
    }

    /// Removes near-duplicates within a single batch. First occurrence
    /// wins; running this twice over an already-unique set is a no-op.
    pub fn dedupe_batch(
        items: Vec<ExtractedItem>,
    ) -> (Vec<ExtractedItem>, Vec<ExtractedItem>) {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        let mut duplicates = Vec::new();

        for item in items {
            let fp = fingerprint_item(&item);
            if seen.insert(fp) {
                unique.push(item);
            } else {
                duplicates.push(item);
            }
        }
        (unique, duplicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, url: &str, desc: &str) -> ExtractedItem {
        ExtractedItem {
            title: Some(title.to_string()),
            source_url: url.to_string(),
            description: Some(desc.to_string()),
            ..ExtractedItem::default()
        }
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint("Rust Engineer", "https://example.com/1", "Build things");
        let b = fingerprint("Rust Engineer", "https://example.com/1", "Build things");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let a = fingerprint("Rust  Engineer", "https://example.com/1", "Build   things");
        let b = fingerprint("rust engineer", "HTTPS://EXAMPLE.COM/1", "build things");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_content() {
        let a = fingerprint("Rust Engineer", "https://example.com/1", "x");
        let b = fingerprint("Go Engineer", "https://example.com/1", "x");
        assert_ne!(a, b);
    }

    #[test]
    fn long_descriptions_only_compare_on_prefix() {
        let prefix = "a".repeat(300);
        let a = fingerprint("t", "u", &format!("{prefix} tail one"));
        let b = fingerprint("t", "u", &format!("{prefix} tail two"));
        assert_eq!(a, b);
    }

    #[test]
    fn batch_keeps_first_occurrence() {
        let items = vec![
            item("Rust Engineer", "https://example.com/1", "desc"),
            item("rust engineer", "https://example.com/1", "DESC"),
            item("Go Engineer", "https://example.com/2", "desc"),
        ];
        let (unique, duplicates) = DedupEngine::dedupe_batch(items);
        assert_eq!(unique.len(), 2);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(unique[0].title.as_deref(), Some("Rust Engineer"));
    }

    #[test]
    fn dedupe_batch_is_idempotent() {
        let items = vec![
            item("A", "https://example.com/a", "1"),
            item("B", "https://example.com/b", "2"),
        ];
        let (unique, _) = DedupEngine::dedupe_batch(items);
        let before: Vec<String> = unique.iter().map(fingerprint_item).collect();
        let (again, duplicates) = DedupEngine::dedupe_batch(unique);
        let after: Vec<String> = again.iter().map(fingerprint_item).collect();
        assert_eq!(before, after);
        assert!(duplicates.is_empty());
    }
}
