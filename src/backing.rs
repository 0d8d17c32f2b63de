//! Backing Maps
//!
//! A [`BackingMap`] is the concurrent store behind one or more views. Entries
//! from every view that shares the map live side by side; each stored key is
//! tagged with the scope of the view that owns it, so views only ever see (and
//! clear) their own entries.
//!
//! # Architecture
//!
//! The map uses lock striping: the key space is partitioned across segments by
//! hash, and each segment is a hashbrown map behind its own
//! `parking_lot::RwLock`. Hits take a read lock on one segment; inserts and
//! removals take a write lock on one segment; scans visit segments one at a
//! time and never hold more than one lock.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          BackingMap                                │
//! │                                                                    │
//! │  hash(scope, key) % N  ──▶  Segment Selection                      │
//! │                                                                    │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐     ┌─────────┐              │
//! │  │Segment 0│ │Segment 1│ │Segment 2│ ... │SegmentN │              │
//! │  │[RwLock] │ │[RwLock] │ │[RwLock] │     │[RwLock] │              │
//! │  └─────────┘ └─────────┘ └─────────┘     └─────────┘              │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Maps are shared as `Arc<BackingMap>` and compared by identity; swapping a
//! view onto another map is done through the
//! [`CacheRegistry`](crate::CacheRegistry).

use crate::expiration::Expiration;
use crate::key::{CacheKey, Probe, Scope, StoredKey};
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;
use std::sync::Arc;

/// Default number of segments for a new backing map.
pub const DEFAULT_SEGMENTS: usize = 16;

type Segment = HashMap<StoredKey, Arc<Expiration>, DefaultHashBuilder>;

/// A lock-striped concurrent map from canonical keys to expiration entries.
pub struct BackingMap {
    segments: Box<[RwLock<Segment>]>,
    hash_builder: DefaultHashBuilder,
}

impl BackingMap {
    /// Creates a map with [`DEFAULT_SEGMENTS`] segments.
    pub fn new() -> Self {
        Self::with_segments(DEFAULT_SEGMENTS)
    }

    /// Creates a map with the given number of segments.
    ///
    /// More segments means less contention between unrelated keys. Use a power
    /// of two for the most even distribution.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is 0.
    pub fn with_segments(segments: usize) -> Self {
        assert!(segments > 0, "segments must be > 0");
        let hash_builder = DefaultHashBuilder::default();
        let segments: Vec<_> = (0..segments)
            .map(|_| RwLock::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();

        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
        }
    }

    #[inline]
    fn segment_for<Q: Hash + ?Sized>(&self, key: &Q) -> &RwLock<Segment> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total number of entries across every view sharing this map.
    ///
    /// Segments are read one after another, so the count may be slightly stale
    /// under concurrent writes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.read().len()).sum()
    }

    /// Returns `true` if no view has entries in this map.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.read().is_empty())
    }

    /// Removes every entry of every view sharing this map.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.write().clear();
        }
    }

    pub(crate) fn get<K: CacheKey>(&self, scope: Scope, key: &K) -> Option<Arc<Expiration>> {
        let probe = Probe::new(scope, key);
        self.segment_for(&probe).read().get(&probe).cloned()
    }

    pub(crate) fn contains<K: CacheKey>(&self, scope: Scope, key: &K) -> bool {
        let probe = Probe::new(scope, key);
        self.segment_for(&probe).read().contains_key(&probe)
    }

    pub(crate) fn insert(
        &self,
        key: StoredKey,
        entry: Arc<Expiration>,
    ) -> Option<Arc<Expiration>> {
        self.segment_for(&key).write().insert(key, entry)
    }

    pub(crate) fn remove<K: CacheKey>(&self, scope: Scope, key: &K) -> Option<Arc<Expiration>> {
        let probe = Probe::new(scope, key);
        self.segment_for(&probe).write().remove(&probe)
    }

    /// Removes `key` only while it still maps to `entry`.
    ///
    /// Lets the sweeper evict what it judged stale without clobbering an entry
    /// that was regenerated in the meantime.
    pub(crate) fn remove_if_same(&self, key: &StoredKey, entry: &Arc<Expiration>) -> bool {
        let mut segment = self.segment_for(key).write();
        match segment.get(key) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                segment.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of entries owned by `scope`.
    pub(crate) fn count_scope(&self, scope: Scope) -> usize {
        self.segments
            .iter()
            .map(|s| s.read().keys().filter(|k| k.scope() == scope).count())
            .sum()
    }

    /// Copies out every entry owned by `scope`.
    pub(crate) fn snapshot_scope(&self, scope: Scope) -> Vec<(StoredKey, Arc<Expiration>)> {
        let mut out = Vec::new();
        for segment in self.segments.iter() {
            out.extend(
                segment
                    .read()
                    .iter()
                    .filter(|(k, _)| k.scope() == scope)
                    .map(|(k, v)| (k.clone(), Arc::clone(v))),
            );
        }
        out
    }

    /// Copies out one segment. Used by the sweeper to scan without holding
    /// more than one segment lock at a time.
    pub(crate) fn snapshot_segment(&self, idx: usize) -> Vec<(StoredKey, Arc<Expiration>)> {
        self.segments[idx]
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Removes every entry owned by `scope`, returning how many were removed.
    pub(crate) fn drain_scope(&self, scope: Scope) -> usize {
        let mut removed = 0;
        for segment in self.segments.iter() {
            let mut segment = segment.write();
            let before = segment.len();
            segment.retain(|k, _| k.scope() != scope);
            removed += before - segment.len();
        }
        removed
    }
}

impl Default for BackingMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackingMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingMap")
            .field("segment_count", &self.segments.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::Payload;

    fn entry(value: i32) -> Arc<Expiration> {
        Arc::new(Expiration::new(Payload::Int(value), 0))
    }

    fn int_of(entry: &Arc<Expiration>) -> i32 {
        match entry.value() {
            Payload::Int(v) => *v,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_basic_operations() {
        let map = BackingMap::with_segments(4);
        assert!(map.is_empty());

        map.insert(StoredKey::canonical(1, &"a".to_string()), entry(1));
        map.insert(StoredKey::canonical(1, &"b".to_string()), entry(2));

        assert_eq!(map.len(), 2);
        assert!(map.contains(1, &"a".to_string()));
        assert!(!map.contains(2, &"a".to_string()));
        assert_eq!(map.get(1, &"b".to_string()).map(|e| int_of(&e)), Some(2));

        assert!(map.remove(1, &"a".to_string()).is_some());
        assert!(map.remove(1, &"a".to_string()).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let map = BackingMap::new();
        let key = StoredKey::canonical(1, &9u64);
        assert!(map.insert(key.clone(), entry(1)).is_none());
        let previous = map.insert(key, entry(2));
        assert_eq!(previous.map(|e| int_of(&e)), Some(1));
        assert_eq!(map.get(1, &9u64).map(|e| int_of(&e)), Some(2));
    }

    #[test]
    fn test_scopes_are_isolated() {
        let map = BackingMap::with_segments(8);
        for i in 0..50u32 {
            map.insert(StoredKey::canonical(1, &i), entry(1));
            map.insert(StoredKey::canonical(2, &i), entry(2));
        }

        assert_eq!(map.count_scope(1), 50);
        assert_eq!(map.count_scope(2), 50);
        assert_eq!(map.snapshot_scope(2).len(), 50);

        assert_eq!(map.drain_scope(1), 50);
        assert_eq!(map.count_scope(1), 0);
        assert_eq!(map.count_scope(2), 50);
        assert!(map.contains(2, &7u32));
    }

    #[test]
    fn test_remove_if_same() {
        let map = BackingMap::new();
        let key = StoredKey::canonical(1, &1u8);
        let first = entry(1);
        map.insert(key.clone(), Arc::clone(&first));

        let second = entry(2);
        map.insert(key.clone(), Arc::clone(&second));

        assert!(!map.remove_if_same(&key, &first));
        assert!(map.contains(1, &1u8));
        assert!(map.remove_if_same(&key, &second));
        assert!(!map.contains(1, &1u8));
    }

    #[test]
    fn test_segment_snapshots_cover_everything() {
        let map = BackingMap::with_segments(4);
        for i in 0..100u32 {
            map.insert(StoredKey::canonical(1, &i), entry(0));
        }
        let total: usize = (0..map.segment_count())
            .map(|idx| map.snapshot_segment(idx).len())
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_clear() {
        let map = BackingMap::new();
        map.insert(StoredKey::canonical(1, &1u32), entry(1));
        map.insert(StoredKey::canonical(2, &1u32), entry(1));
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    #[should_panic(expected = "segments must be > 0")]
    fn test_zero_segments_panics() {
        let _ = BackingMap::with_segments(0);
    }
}
