//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the common capability behind the two
//! similarity backends: the disk-backed SQLite store (primary, best-effort)
//! and [`MemoryIndex`](memory::MemoryIndex) (secondary, always available).
//! The pipeline picks one per load generation and talks to it only through
//! this trait.
//!
//! # Contract
//!
//! | Method | Behaviour |
//! |--------|-----------|
//! | [`insert`](VectorIndex::insert) | Store `(id, vector)`; a duplicate id overwrites in place |
//! | [`search`](VectorIndex::search) | Top `k` by cosine similarity, descending, ties in insertion order |
//! | [`len`](VectorIndex::len) | Number of distinct ids stored |
//!
//! An index never stores content, only ids that refer back into the
//! [`DocumentStore`](crate::store::DocumentStore). Searching an empty index
//! returns an empty list. An index that has not been initialized fails with
//! [`IndexError::NotReady`] rather than returning an empty list.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Backend;

/// Errors raised by a [`VectorIndex`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index is not ready")]
    NotReady,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector has a non-finite component at position {position}")]
    NonFinite { position: usize },

    #[error("vector index storage error: {0}")]
    Storage(String),
}

/// A single search hit: an id and its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Which backend this index implements.
    fn backend(&self) -> Backend;

    /// Whether the index can accept inserts and searches.
    fn is_ready(&self) -> bool;

    /// Vector dimensionality accepted by this index.
    fn dims(&self) -> usize;

    async fn insert(&self, id: &str, vector: &[f32]) -> Result<(), IndexError>;

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;
}

/// Order scored candidates for a top-`k` answer.
///
/// `candidates` must already be in insertion order. The sort is stable, so
/// equal scores keep that order and the first-inserted entry wins the tie.
/// A NaN score ranks below every number.
pub fn rank_top_k(mut candidates: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    candidates.sort_by(|a, b| sort_key(b.score).total_cmp(&sort_key(a.score)));
    candidates.truncate(k);
    candidates
}

// `total_cmp` orders -0.0 below 0.0; both must tie.
fn sort_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// Check a vector before it enters an index: it must have the index
/// dimensionality and only finite components.
pub fn check_vector(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(IndexError::NonFinite { position });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> IndexHit {
        IndexHit {
            id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_rank_descending_and_truncated() {
        let ranked = rank_top_k(vec![hit("a", 0.1), hit("b", 0.9), hit("c", 0.5)], 2);
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order() {
        let ranked = rank_top_k(
            vec![hit("first", 0.5), hit("second", 0.5), hit("third", 0.5)],
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rank_zero_k() {
        assert!(rank_top_k(vec![hit("a", 1.0)], 0).is_empty());
    }

    #[test]
    fn test_rank_nan_sorts_last() {
        let ranked = rank_top_k(
            vec![hit("c", 0.7), hit("nan", f32::NAN), hit("a", 1.0), hit("z", -0.2)],
            4,
        );
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "z", "nan"]);
    }

    #[test]
    fn test_rank_signed_zeros_tie() {
        let ranked = rank_top_k(vec![hit("neg", -0.0), hit("pos", 0.0)], 2);
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["neg", "pos"]);
    }

    #[test]
    fn test_check_vector_rejects_non_finite() {
        match check_vector(3, &[1.0, f32::NAN, 0.0]) {
            Err(IndexError::NonFinite { position }) => assert_eq!(position, 1),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(check_vector(2, &[f32::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn test_check_vector_dims() {
        assert!(check_vector(2, &[1.0, 2.0]).is_ok());
        match check_vector(3, &[1.0]) {
            Err(IndexError::DimensionMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
