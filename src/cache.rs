use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use crate::domain::StructureId;
use crate::record::StructureRecord;

pub const DEFAULT_CACHE_CAPACITY: usize = 50_000;

#[derive(Clone)]
pub struct StructureCache {
    inner: Arc<Mutex<LruCache<StructureId, StructureRecord>>>,
}

impl StructureCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<StructureId, StructureRecord>> {
        // A panicked worker cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &StructureId) -> Option<StructureRecord> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &StructureId) -> bool {
        self.lock().contains(id)
    }

    pub fn insert(&self, record: StructureRecord) -> Option<StructureId> {
        let id = record.structure_id.clone();
        let mut cache = self.lock();
        match cache.push(id.clone(), record) {
            Some((evicted, _)) if evicted != id => Some(evicted),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
