//! Document store: id → content and metadata.
//!
//! A plain mapping with no search capability. Indices return ids and the
//! pipeline hydrates them here.
//!
//! # Duplicate ids
//!
//! The policy is **last write wins**: a second [`put`](DocumentStore::put)
//! with the same id replaces the earlier item. `put` returns `true` when it
//! replaced something so callers can surface the duplicate instead of
//! letting it pass silently.

use std::collections::HashMap;

use crate::models::StoredItem;

#[derive(Debug, Default)]
pub struct DocumentStore {
    items: HashMap<String, StoredItem>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the item for `id`. Returns `true` if an earlier
    /// item with the same id was replaced.
    pub fn put(&mut self, id: &str, item: StoredItem) -> bool {
        self.items.insert(id.to_string(), item).is_some()
    }

    /// Look up an item by id. `None` is the not-found condition.
    pub fn get(&self, id: &str) -> Option<&StoredItem> {
        self.items.get(id)
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
