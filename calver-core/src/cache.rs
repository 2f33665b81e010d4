//! Memoization of version-to-version diffs.
//!
//! The cache is never authoritative: every entry can be recomputed from two
//! stored versions, and a failing cache behaves like an empty one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::diff::FieldDelta;
use crate::event::EventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffKey {
    pub event_id: EventId,
    pub from: u32,
    pub to: u32,
}

impl DiffKey {
    pub fn new(event_id: EventId, from: u32, to: u32) -> Self {
        DiffKey { event_id, from, to }
    }
}

pub trait DiffCache: Send + Sync {
    fn get(&self, key: &DiffKey) -> Option<Arc<Vec<FieldDelta>>>;

    fn put(&self, key: DiffKey, deltas: Arc<Vec<FieldDelta>>);

    /// Drop every entry touching `event`.
    fn invalidate_event(&self, event: EventId);

    fn clear(&self);
}

/// A cache that stores nothing.
pub struct NoCache;

impl DiffCache for NoCache {
    fn get(&self, _key: &DiffKey) -> Option<Arc<Vec<FieldDelta>>> {
        None
    }

    fn put(&self, _key: DiffKey, _deltas: Arc<Vec<FieldDelta>>) {}

    fn invalidate_event(&self, _event: EventId) {}

    fn clear(&self) {}
}

#[derive(Default)]
pub struct MemoryDiffCache {
    entries: RwLock<HashMap<DiffKey, Arc<Vec<FieldDelta>>>>,
}

impl MemoryDiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiffCache for MemoryDiffCache {
    fn get(&self, key: &DiffKey) -> Option<Arc<Vec<FieldDelta>>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn put(&self, key: DiffKey, deltas: Arc<Vec<FieldDelta>>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, deltas);
        }
    }

    fn invalidate_event(&self, event: EventId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|key, _| key.event_id != event);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
