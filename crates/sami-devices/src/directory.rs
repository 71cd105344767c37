//! Identity lookups shared by all workers.
//!
//! Tables are copy-on-write: readers clone an `Arc` to the current map and
//! classify against that snapshot, writers build a new map and swap it in. An
//! enrollment therefore never blocks a classification in progress.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug)]
pub struct SnapshotTable<K, V> {
    current: RwLock<Arc<HashMap<K, V>>>,
}

impl<K, V> Default for SnapshotTable<K, V> {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
        }
    }
}

impl<K, V> SnapshotTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            current: RwLock::new(Arc::new(entries.into_iter().collect())),
        }
    }

    /// The current table. Later writes do not affect the returned map.
    pub fn snapshot(&self) -> Arc<HashMap<K, V>> {
        self.current.read().clone()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.snapshot().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut current = self.current.write();
        let mut next = (**current).clone();
        let previous = next.insert(key, value);
        *current = Arc::new(next);
        previous
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut current = self.current.write();
        if !current.contains_key(key) {
            return None;
        }
        let mut next = (**current).clone();
        let previous = next.remove(key);
        *current = Arc::new(next);
        previous
    }

    /// Swap in a completely new table.
    pub fn replace(&self, entries: impl IntoIterator<Item = (K, V)>) {
        *self.current.write() = Arc::new(entries.into_iter().collect());
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

/// A person or asset a tag is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: i64,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Tag assignment. A tag may carry both an employee and an asset binding;
/// the employee binding takes precedence when classifying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagBinding {
    #[serde(default)]
    pub employee: Option<EntityRef>,
    #[serde(default)]
    pub asset: Option<EntityRef>,
}

/// Tag id to employee/asset lookup used by the RFID classifier.
#[derive(Debug, Default)]
pub struct TagDirectory {
    table: SnapshotTable<String, TagBinding>,
}

impl TagDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_employee(&self, tag_id: impl Into<String>, employee: EntityRef) {
        let tag_id = tag_id.into();
        let mut binding = self.table.get(&tag_id).unwrap_or_default();
        binding.employee = Some(employee);
        self.table.insert(tag_id, binding);
    }

    pub fn bind_asset(&self, tag_id: impl Into<String>, asset: EntityRef) {
        let tag_id = tag_id.into();
        let mut binding = self.table.get(&tag_id).unwrap_or_default();
        binding.asset = Some(asset);
        self.table.insert(tag_id, binding);
    }

    pub fn unbind(&self, tag_id: &str) -> Option<TagBinding> {
        self.table.remove(&tag_id.to_string())
    }

    pub fn resolve(&self, tag_id: &str) -> Option<TagBinding> {
        self.table.get(&tag_id.to_string())
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, TagBinding>> {
        self.table.snapshot()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
