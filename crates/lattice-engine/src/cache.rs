//! Process-wide store of loaded aggregate segments.
//!
//! The cache is the only shared mutable resource in the engine. It is an
//! explicit service instance owned by the engine/session context and passed
//! (via `Arc`) to readers and loaders; there is no global singleton. It
//! applies no size/age eviction, and [`AggregationCache::flush`] is the only
//! removal path, so callers always know exactly when cached data goes stale.

use crate::predicate::ColumnPredicate;
use crate::request::SegmentKey;
use dashmap::DashMap;
use lattice_model::{ColumnId, Datum, MeasureId, StarId};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

/// Measure values at one coordinate, aligned with the segment's measure list.
pub type MeasureRow = SmallVec<[Datum; 2]>;

/// An immutable slice of aggregated data for one grouping level and one
/// combined predicate set.
///
/// Segments are immutable once stored: they are replaced wholesale by a
/// flush-and-reload, never partially mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    key: SegmentKey,
    /// Coordinate tuples (ascending column-id order) to measure values.
    cells: HashMap<Vec<Datum>, MeasureRow>,
}

impl Segment {
    pub fn new(key: SegmentKey, cells: HashMap<Vec<Datum>, MeasureRow>) -> Self {
        Self { key, cells }
    }

    pub fn key(&self) -> &SegmentKey {
        &self.key
    }

    pub fn star(&self) -> StarId {
        self.key.star
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.key.columns
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Does this segment's predicate region cover the given coordinates?
    ///
    /// Coordinates must be aligned with [`Segment::columns`]. A covered
    /// coordinate with no stored row is a legitimately empty cell (no fact
    /// rows), distinct from "not covered".
    pub fn covers(&self, coordinates: &[Datum]) -> bool {
        coordinates.len() == self.key.columns.len()
            && self
                .key
                .predicates
                .iter()
                .zip(coordinates)
                .all(|(p, v)| p.contains(v))
    }

    /// Value of `measure` at `coordinates`, if a fact row was aggregated
    /// there. Rows narrower than the key's measure list read as absent
    /// rather than panicking.
    pub fn value(&self, coordinates: &[Datum], measure: MeasureId) -> Option<&Datum> {
        let index = self.key.measures.iter().position(|m| *m == measure)?;
        self.cells.get(coordinates).and_then(|row| row.get(index))
    }

    pub fn measures(&self) -> &[MeasureId] {
        &self.key.measures
    }

    pub fn predicates(&self) -> &[ColumnPredicate] {
        &self.key.predicates
    }
}

/// Outcome of [`AggregationCache::lookup_or_begin`].
pub enum CacheOutcome<'a> {
    /// A segment with this value signature is already loaded.
    Hit(Arc<Segment>),
    /// No segment and no other in-flight load: the caller is now the leader
    /// and must complete or abandon the permit.
    Miss(LoadPermit<'a>),
}

/// Exclusive right to load one segment key.
///
/// Dropping the permit without [`LoadPermit::complete`] abandons the load and
/// wakes waiters, one of which becomes the next leader (failed loads are
/// retried independently by whoever still wants the key).
pub struct LoadPermit<'a> {
    cache: &'a AggregationCache,
    key: SegmentKey,
    done: bool,
}

impl<'a> LoadPermit<'a> {
    pub fn key(&self) -> &SegmentKey {
        &self.key
    }

    /// Installs the loaded segment and wakes waiters.
    pub fn complete(mut self, segment: Segment) -> Arc<Segment> {
        debug_assert_eq!(segment.key(), &self.key);
        let shared = self.cache.insert_arc(Arc::new(segment));
        self.done = true;
        self.cache.finish_flight(&self.key);
        shared
    }
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.finish_flight(&self.key);
        }
    }
}

/// Index key for cell lookup: all segments of one star sharing one column
/// set, regardless of predicate values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ShapeKey {
    star: StarId,
    columns: Vec<ColumnId>,
}

impl ShapeKey {
    fn of(key: &SegmentKey) -> Self {
        Self {
            star: key.star,
            columns: key.columns.clone(),
        }
    }
}

/// Keyed store of loaded segments with single-flight loading.
///
/// Safe under concurrent `lookup` / `insert` / `flush` from multiple
/// evaluation threads. `insert` for the same key is idempotent; replacing a
/// key with structurally different data is an internal invariant violation
/// (value signatures are deterministic) and is checked in debug builds.
#[derive(Debug, Default)]
pub struct AggregationCache {
    segments: DashMap<SegmentKey, Arc<Segment>>,
    index: DashMap<ShapeKey, Vec<SegmentKey>>,
    /// Keys currently being loaded. Guarded separately from the segment map
    /// so waiters can block on the condvar without holding a shard lock.
    in_flight: Mutex<HashSet<SegmentKey>>,
    flight_done: Condvar,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &SegmentKey) -> Option<Arc<Segment>> {
        self.segments.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Installs a segment under its value signature. Idempotent: last
    /// writer's data is structurally equal by construction, so races between
    /// writers are harmless.
    pub fn insert(&self, segment: Segment) -> Arc<Segment> {
        self.insert_arc(Arc::new(segment))
    }

    fn insert_arc(&self, segment: Arc<Segment>) -> Arc<Segment> {
        let key = segment.key().clone();
        if let Some(previous) = self.segments.insert(key.clone(), Arc::clone(&segment)) {
            debug_assert_eq!(
                previous.as_ref(),
                segment.as_ref(),
                "cache key collision with structurally different data"
            );
        } else {
            let mut shapes = self.index.entry(ShapeKey::of(&key)).or_default();
            if !shapes.contains(&key) {
                shapes.push(key);
            }
        }
        segment
    }

    /// Cache lookup with the single-flight discipline.
    ///
    /// Returns [`CacheOutcome::Hit`] when the segment is present. Otherwise,
    /// if another thread is already loading this key, blocks until that load
    /// completes or is abandoned, then re-checks; the first waiter after an
    /// abandoned load becomes the new leader.
    pub fn lookup_or_begin(&self, key: &SegmentKey) -> CacheOutcome<'_> {
        let mut in_flight = self.in_flight.lock().expect("cache in-flight set poisoned");
        loop {
            if let Some(segment) = self.lookup(key) {
                return CacheOutcome::Hit(segment);
            }
            if !in_flight.contains(key) {
                in_flight.insert(key.clone());
                return CacheOutcome::Miss(LoadPermit {
                    cache: self,
                    key: key.clone(),
                    done: false,
                });
            }
            in_flight = self
                .flight_done
                .wait(in_flight)
                .expect("cache in-flight set poisoned");
        }
    }

    /// Segments of `star` grouped exactly by `columns` (ascending ids).
    pub fn segments_for(&self, star: StarId, columns: &[ColumnId]) -> Vec<Arc<Segment>> {
        let shape = ShapeKey {
            star,
            columns: columns.to_vec(),
        };
        let Some(keys) = self.index.get(&shape) else {
            return Vec::new();
        };
        keys.iter().filter_map(|key| self.lookup(key)).collect()
    }

    /// Clears every entry. Used for explicit invalidation after schema/data
    /// changes and by test harnesses to force re-querying.
    ///
    /// Flush does not cancel in-flight loads: a load completing afterwards
    /// still populates the cache. Callers needing strict flush/load ordering
    /// must serialize externally.
    pub fn flush(&self) {
        self.segments.clear();
        self.index.clear();
    }

    fn finish_flight(&self, key: &SegmentKey) {
        let mut in_flight = self.in_flight.lock().expect("cache in-flight set poisoned");
        in_flight.remove(key);
        drop(in_flight);
        self.flight_done.notify_all();
    }
}
