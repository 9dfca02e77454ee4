//! Turns merge groups into aggregate queries and decodes result rows into
//! cached segments.

use crate::batch::Batch;
use crate::cache::{AggregationCache, CacheOutcome, LoadPermit, MeasureRow, Segment};
use crate::error::LoadError;
use crate::grouping::{combined_predicates, MergeGroup};
use crate::predicate::ColumnPredicate;
use crate::request::{BatchKey, SegmentKey};
use crate::sql::{AggregateQuery, GroupingLevel, QueryBuilder, QueryExecutor, QueryHook};
use lattice_model::{ColumnId, Datum, MeasureId, StarCatalog};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Decoded cells for one grouping level.
type LevelCells = HashMap<Vec<Datum>, MeasureRow>;

/// Result of loading one merge group: per-batch segments or failures, plus
/// counters for the caller's report.
#[derive(Debug)]
pub struct GroupLoadResult {
    pub outcomes: Vec<(BatchKey, Result<Arc<Segment>, LoadError>)>,
    pub queries_issued: usize,
    pub cache_hits: usize,
}

/// Executes aggregate loads for merge groups against the external
/// query-builder and execution boundaries, consulting the cache first.
pub struct AggregationLoader {
    builder: Arc<dyn QueryBuilder>,
    executor: Arc<dyn QueryExecutor>,
    hook: Option<Arc<dyn QueryHook>>,
}

impl AggregationLoader {
    pub fn new(builder: Arc<dyn QueryBuilder>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            builder,
            executor,
            hook: None,
        }
    }

    pub fn set_hook(&mut self, hook: Arc<dyn QueryHook>) {
        self.hook = Some(hook);
    }

    /// Loads every grouping level of `group`, skipping levels whose value
    /// signature is already cached (or becomes cached while another thread's
    /// in-flight load finishes). Pending levels are fetched with a single
    /// query and installed into the cache on success.
    ///
    /// Build and execution failures fail every pending level of the group.
    /// Decode failures attributable to one grouping level fail only that
    /// level's batch; cleanly decoded sibling levels still install.
    pub fn load_group(
        &self,
        group: &mut MergeGroup,
        catalog: &StarCatalog,
        cache: &AggregationCache,
    ) -> GroupLoadResult {
        let mut result = GroupLoadResult {
            outcomes: Vec::with_capacity(group.level_count()),
            queries_issued: 0,
            cache_hits: 0,
        };

        for batch in group.batches_mut() {
            batch.mark_loading();
        }

        // Cache consultation under the single-flight discipline: each level
        // either hits, or yields a permit making this thread the leader for
        // that signature.
        let mut pending: Vec<(usize, GroupingLevel, LoadPermit<'_>)> = Vec::new();
        let mut hits: Vec<(usize, Arc<Segment>)> = Vec::new();
        for (index, batch) in group.batches().enumerate() {
            let level = level_of(batch);
            let key = segment_key(batch, &level);
            match cache.lookup_or_begin(&key) {
                CacheOutcome::Hit(segment) => {
                    result.cache_hits += 1;
                    hits.push((index, segment));
                }
                CacheOutcome::Miss(permit) => pending.push((index, level, permit)),
            }
        }

        let mut fetched = if pending.is_empty() {
            HashMap::new()
        } else {
            match self.fetch(group, catalog, &pending, &mut result.queries_issued) {
                Ok(fetched) => fetched,
                Err(err) => {
                    // Permits drop here, abandoning the in-flight markers so
                    // waiters can retry independently.
                    let failed: HashSet<usize> = pending.iter().map(|(i, _, _)| *i).collect();
                    for (i, batch) in group.batches_mut().enumerate() {
                        if failed.contains(&i) {
                            batch.mark_failed();
                        } else {
                            batch.mark_loaded();
                        }
                    }
                    for (index, _, _) in pending {
                        let key = batch_key_at(group, index);
                        result.outcomes.push((key, Err(err.clone())));
                    }
                    for (index, segment) in hits {
                        let key = batch_key_at(group, index);
                        // Levels satisfied from cache stay resolved even
                        // though the group's query failed.
                        result.outcomes.push((key, Ok(segment)));
                    }
                    result
                        .outcomes
                        .sort_by(|a, b| a.0.cmp(&b.0));
                    return result;
                }
            }
        };

        let mut failed: HashSet<usize> = HashSet::new();
        for (index, _level, permit) in pending {
            match fetched.remove(&index).unwrap_or_else(|| Ok(LevelCells::new())) {
                Ok(cells) => {
                    let key = permit.key().clone();
                    let segment = permit.complete(Segment::new(key, cells));
                    result
                        .outcomes
                        .push((batch_key_at(group, index), Ok(segment)));
                }
                // The permit drops unfinished here, abandoning the in-flight
                // marker for this level only.
                Err(err) => {
                    failed.insert(index);
                    result.outcomes.push((batch_key_at(group, index), Err(err)));
                }
            }
        }
        for (index, segment) in hits {
            result
                .outcomes
                .push((batch_key_at(group, index), Ok(segment)));
        }
        result.outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        for (i, batch) in group.batches_mut().enumerate() {
            if failed.contains(&i) {
                batch.mark_failed();
            } else {
                batch.mark_loaded();
            }
        }
        result
    }

    /// Builds, announces and executes the query for the pending levels, then
    /// decodes rows into per-level outcomes keyed by level index.
    /// `queries_issued` counts only queries that reached the executor.
    fn fetch(
        &self,
        group: &MergeGroup,
        catalog: &StarCatalog,
        pending: &[(usize, GroupingLevel, LoadPermit<'_>)],
        queries_issued: &mut usize,
    ) -> Result<HashMap<usize, Result<LevelCells, LoadError>>, LoadError> {
        // The most detailed pending level leads the query; chain ordering
        // makes it a superset of every other pending level.
        let levels: Vec<GroupingLevel> = pending.iter().map(|(_, l, _)| l.clone()).collect();
        let measures = union_measures(group, pending);
        let query = AggregateQuery {
            star: group.detailed.key().star,
            levels: levels.clone(),
            measures: measures.clone(),
        };
        let sql = self.builder.build(&query, catalog)?;
        *queries_issued += 1;
        if let Some(hook) = &self.hook {
            hook.on_query(&sql);
        }
        let rows = self.executor.execute(&sql)?;

        decode_rows(&rows, group, pending, &levels, &measures)
    }
}

fn batch_key_at(group: &MergeGroup, index: usize) -> BatchKey {
    group
        .batches()
        .nth(index)
        .map(|b| b.key().clone())
        .expect("level index in range")
}

/// Sorted distinct measures across the pending levels' batches, defining the
/// query's measure column order.
fn union_measures(
    group: &MergeGroup,
    pending: &[(usize, GroupingLevel, LoadPermit<'_>)],
) -> Vec<MeasureId> {
    let mut measures: Vec<MeasureId> = Vec::new();
    for (index, _, _) in pending {
        if let Some(batch) = group.batches().nth(*index) {
            for measure in batch.measures() {
                if !measures.contains(measure) {
                    measures.push(*measure);
                }
            }
        }
    }
    measures.sort();
    measures
}

/// The grouping level a batch contributes: its sorted column keys and the
/// union of its requests' predicates per column.
pub(crate) fn level_of(batch: &Batch) -> GroupingLevel {
    let combined = combined_predicates(batch);
    let columns: Vec<ColumnId> = batch.key().columns.iter().copied().collect();
    let predicates = columns
        .iter()
        .map(|c| combined.get(c).cloned().unwrap_or(ColumnPredicate::Any))
        .collect();
    GroupingLevel {
        columns,
        predicates,
    }
}

/// A batch's cache signature: star, grouping columns, combined predicate
/// values and its own sorted measure list.
pub(crate) fn segment_key(batch: &Batch, level: &GroupingLevel) -> SegmentKey {
    let mut measures = batch.measures().to_vec();
    measures.sort();
    SegmentKey {
        star: batch.key().star,
        columns: level.columns.clone(),
        predicates: level.predicates.clone(),
        measures,
    }
}

/// Routes result rows to their grouping levels and decodes them.
///
/// Failures that can be pinned to one level (an out-of-range grouping flag on
/// an otherwise attributable row) are reported per level in the returned map.
/// Failures that cannot be attributed (wrong row width, a non-integer flag,
/// a mask matching no requested level) fail the whole group via `Err`.
fn decode_rows(
    rows: &[Vec<Datum>],
    group: &MergeGroup,
    pending: &[(usize, GroupingLevel, LoadPermit<'_>)],
    levels: &[GroupingLevel],
    measures: &[MeasureId],
) -> Result<HashMap<usize, Result<LevelCells, LoadError>>, LoadError> {
    let base = &levels[0];
    let n_cols = base.columns.len();
    let multi_level = levels.len() > 1;
    let n_flags = if multi_level { n_cols } else { 0 };
    let expected_len = n_cols + n_flags + measures.len();

    // Bitmask (bit i = base column i rolled away) to pending-slot index.
    let mut mask_to_slot: HashMap<u64, usize> = HashMap::new();
    for (slot, level) in levels.iter().enumerate() {
        let mut mask = 0u64;
        for (i, column) in base.columns.iter().enumerate() {
            if !level.columns.contains(column) {
                mask |= 1 << i;
            }
        }
        mask_to_slot.insert(mask, slot);
    }

    // Per-slot projection of the union measure columns down to the slot
    // batch's own measures.
    let mut measure_projection: Vec<Vec<usize>> = Vec::with_capacity(pending.len());
    for (index, _, _) in pending {
        let batch = group.batches().nth(*index).expect("level index in range");
        let mut own: Vec<MeasureId> = batch.measures().to_vec();
        own.sort();
        let projection = own
            .iter()
            .map(|m| {
                measures
                    .iter()
                    .position(|q| q == m)
                    .expect("union covers every batch measure")
            })
            .collect();
        measure_projection.push(projection);
    }

    let mut decoded: HashMap<usize, LevelCells> = HashMap::new();
    let mut level_errors: HashMap<usize, LoadError> = HashMap::new();
    for (row_index, row) in rows.iter().enumerate() {
        if row.len() != expected_len {
            return Err(LoadError::Decode(format!(
                "row {row_index}: expected {expected_len} columns, got {}",
                row.len()
            )));
        }

        let slot = if multi_level {
            let mut mask = 0u64;
            let mut bad_flag: Option<String> = None;
            for (i, flag) in row[n_cols..n_cols + n_flags].iter().enumerate() {
                match flag {
                    Datum::Int(0) => {}
                    Datum::Int(1) => mask |= 1 << i,
                    // `grouping()` returns 0 or 1, but any nonzero integer
                    // still marks the column rolled away, which is enough to
                    // attribute the row (and its failure) to a level.
                    Datum::Int(_) => {
                        mask |= 1 << i;
                        bad_flag.get_or_insert_with(|| {
                            format!(
                                "row {row_index}: grouping flag {i} is {flag}, expected 0 or 1"
                            )
                        });
                    }
                    other => {
                        return Err(LoadError::Decode(format!(
                            "row {row_index}: grouping flag {i} is {other}, expected 0 or 1"
                        )))
                    }
                }
            }
            let slot = *mask_to_slot.get(&mask).ok_or_else(|| {
                LoadError::Decode(format!(
                    "row {row_index}: grouping mask {mask:#b} matches no requested level"
                ))
            })?;
            if let Some(message) = bad_flag {
                level_errors
                    .entry(pending[slot].0)
                    .or_insert(LoadError::Decode(message));
                continue;
            }
            slot
        } else {
            0
        };

        let level = &levels[slot];
        let coordinates: Vec<Datum> = base
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| level.columns.contains(c))
            .map(|(i, _)| row[i].clone())
            .collect();
        let values: MeasureRow = measure_projection[slot]
            .iter()
            .map(|&i| row[n_cols + n_flags + i].clone())
            .collect();

        let pending_index = pending[slot].0;
        decoded
            .entry(pending_index)
            .or_default()
            .insert(coordinates, values);
    }

    let mut outcomes = HashMap::with_capacity(pending.len());
    for (index, _, _) in pending {
        let outcome = match level_errors.remove(index) {
            Some(err) => Err(err),
            // A level with no matching rows still produces an (empty)
            // segment.
            None => Ok(decoded.remove(index).unwrap_or_default()),
        };
        outcomes.insert(*index, outcome);
    }
    Ok(outcomes)
}
