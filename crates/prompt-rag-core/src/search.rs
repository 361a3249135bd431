//! Result hydration for ranked index hits.
//!
//! Index backends return `(id, score)` pairs. This module joins them with
//! the [`DocumentStore`] into the result shapes the pipeline returns:
//! [`SearchHit`] for `search`, [`SourceRef`] for the sources attached to an
//! `ask` answer.

use serde::Serialize;

use crate::index::IndexHit;
use crate::store::DocumentStore;

/// A hydrated search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Cosine similarity rounded to 4 decimals.
    pub score: f64,
    pub content: String,
}

/// A compact source reference attached to a synthesized answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
    pub category: String,
    pub score: f64,
    pub snippet: String,
}

impl SourceRef {
    pub fn from_hit(hit: &SearchHit, snippet_chars: usize) -> Self {
        Self {
            id: hit.id.clone(),
            name: hit.name.clone(),
            category: hit.category.clone(),
            score: hit.score,
            snippet: snippet(&hit.content, snippet_chars),
        }
    }
}

/// Join ranked hits with their stored content, preserving rank order.
///
/// A hit whose id is missing from the store is dropped; the second value
/// of the returned tuple counts such dangling hits so the caller can log
/// them.
pub fn hydrate(hits: &[IndexHit], store: &DocumentStore) -> (Vec<SearchHit>, usize) {
    let mut dangling = 0;
    let results = hits
        .iter()
        .filter_map(|hit| match store.get(&hit.id) {
            Some(item) => Some(SearchHit {
                id: hit.id.clone(),
                name: item.name.clone(),
                category: item.category.clone(),
                tags: item.tags.clone(),
                score: round_score(hit.score),
                content: item.content.clone(),
            }),
            None => {
                dangling += 1;
                None
            }
        })
        .collect();
    (results, dangling)
}

/// Round a similarity score to 4 decimal places.
pub fn round_score(score: f32) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    (score as f64 * 10_000.0).round() / 10_000.0
}

/// First `max_chars` characters of `text`.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
