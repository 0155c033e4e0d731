//! Read-through cache for single timetable entries.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use timetable_metrics::EventRecorder;

use crate::store::TimetableEntry;

/// Cache label used in `cache_*` metrics.
pub const SCHEDULE_CACHE: &str = "schedule_cache";

/// Bounded cache of entries by id. When full, the entry cached first is
/// evicted. Hits, misses and the total serialized size are published on
/// every access.
///
/// Every invalidation bumps a generation counter. A reader takes
/// [`generation`](Self::generation) before going to the store and hands it
/// back to [`insert`](Self::insert), which drops the row if anything was
/// invalidated in between.
pub struct ScheduleCache {
    name: &'static str,
    capacity: usize,
    events: EventRecorder,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<i64, Cached>,
    order: VecDeque<i64>,
    bytes: u64,
    generation: u64,
}

struct Cached {
    entry: TimetableEntry,
    size: u64,
}

impl CacheInner {
    fn remove(&mut self, id: i64) -> bool {
        let Some(old) = self.entries.remove(&id) else {
            return false;
        };
        self.bytes = self.bytes.saturating_sub(old.size);
        self.order.retain(|k| *k != id);
        true
    }
}

impl ScheduleCache {
    pub fn new(name: &'static str, capacity: usize, events: EventRecorder) -> Self {
        Self {
            name,
            capacity,
            events,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, id: i64) -> Option<TimetableEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let found = inner.entries.get(&id).map(|c| c.entry.clone());
        self.events.track_cache_access(self.name, found.is_some());
        found
    }

    /// Current generation, to be passed to [`insert`](Self::insert).
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Cache `entry` if nothing was invalidated since `seen` was taken.
    pub fn insert(&self, entry: TimetableEntry, seen: u64) {
        if self.capacity == 0 {
            return;
        }
        let size = serde_json::to_vec(&entry).map_or(0, |v| v.len() as u64);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.generation != seen {
            return;
        }
        inner.remove(entry.id);
        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.front().copied() else {
                break;
            };
            inner.remove(oldest);
        }
        inner.order.push_back(entry.id);
        inner.entries.insert(entry.id, Cached { entry, size });
        inner.bytes += size;
        self.events.set_cache_size(self.name, inner.bytes);
    }

    pub fn invalidate(&self, id: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation = inner.generation.wrapping_add(1);
        if inner.remove(id) {
            self.events.set_cache_size(self.name, inner.bytes);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed serialized size of the cached entries.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).bytes
    }
}
