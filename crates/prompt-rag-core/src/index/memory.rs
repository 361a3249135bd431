//! In-memory [`VectorIndex`] implementation.
//!
//! The secondary backend and the pipeline's correctness floor: it has no
//! external dependencies, so it always initializes. Search is brute-force
//! cosine similarity over every stored vector.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::Backend;

use super::{check_vector, rank_top_k, IndexError, IndexHit, VectorIndex};

#[derive(Default)]
struct Entries {
    /// Vectors in insertion order.
    slots: Vec<(String, Vec<f32>)>,
    /// id → position in `slots`.
    positions: HashMap<String, usize>,
}

/// In-memory vector index.
pub struct MemoryIndex {
    dims: usize,
    entries: RwLock<Entries>,
}

impl MemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Entries::default()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn backend(&self) -> Backend {
        Backend::Secondary
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert(&self, id: &str, vector: &[f32]) -> Result<(), IndexError> {
        check_vector(self.dims, vector)?;
        let mut entries = self.entries.write();
        match entries.positions.get(id).copied() {
            // Overwrite in place so the entry keeps its first-insertion tie-break rank.
            Some(pos) => entries.slots[pos].1 = vector.to_vec(),
            None => {
                let pos = entries.slots.len();
                entries.slots.push((id.to_string(), vector.to_vec()));
                entries.positions.insert(id.to_string(), pos);
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<IndexHit> = {
            let entries = self.entries.read();
            entries
                .slots
                .iter()
                .map(|(id, vector)| IndexHit {
                    id: id.clone(),
                    score: cosine_similarity(query, vector),
                })
                .collect()
        };
        Ok(rank_top_k(candidates, k))
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(hits: &[IndexHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let index = MemoryIndex::new(2);
        let hits = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = MemoryIndex::new(2);
        index.insert("x", &[1.0, 0.0]).await.unwrap();
        index.insert("y", &[0.0, 1.0]).await.unwrap();
        index.insert("xy", &[1.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.1], 3).await.unwrap();
        assert_eq!(ids(&hits), vec!["x", "xy", "y"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let index = MemoryIndex::new(2);
        for i in 0..10 {
            index
                .insert(&format!("d{}", i), &[1.0, i as f32])
                .await
                .unwrap();
        }
        assert_eq!(index.search(&[1.0, 0.0], 3).await.unwrap().len(), 3);
        assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_broken_by_insertion_order() {
        let index = MemoryIndex::new(2);
        index.insert("b", &[1.0, 0.0]).await.unwrap();
        index.insert("a", &[2.0, 0.0]).await.unwrap();
        index.insert("c", &[3.0, 0.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(ids(&hits), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_overwrites_and_keeps_position() {
        let index = MemoryIndex::new(2);
        index.insert("a", &[0.0, 1.0]).await.unwrap();
        index.insert("b", &[1.0, 0.0]).await.unwrap();
        index.insert("a", &[1.0, 0.0]).await.unwrap();

        assert_eq!(index.len().await.unwrap(), 2);
        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        // Same score now; "a" was inserted first.
        assert_eq!(ids(&hits), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = MemoryIndex::new(3);
        let err = index.insert("a", &[1.0, 0.0]).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nan_vector_rejected_and_ranking_intact() {
        let index = MemoryIndex::new(2);
        index.insert("c", &[0.5, 0.5]).await.unwrap();
        let err = index.insert("b", &[f32::NAN, 0.0]).await.unwrap_err();
        assert!(matches!(err, IndexError::NonFinite { position: 0 }));
        index.insert("a", &[1.0, 0.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(ids(&hits), vec!["a", "c"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
