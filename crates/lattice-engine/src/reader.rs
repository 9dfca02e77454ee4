//! Public facade: record cell requests, load aggregations, read cell values.

use crate::batch::BatchBuilder;
use crate::cache::AggregationCache;
use crate::error::{LoadError, RequestError};
use crate::grouping::{GreedyChainStrategy, MergeStrategy};
use crate::loader::AggregationLoader;
use crate::request::{BatchKey, CellRequest};
use crate::sql::{QueryBuilder, QueryExecutor, QueryHook};
use lattice_model::{Datum, StarCatalog, StarId};
use std::sync::Arc;

/// Result of looking up one fully-specified cell.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    /// The aggregated value.
    Found(Datum),
    /// A loaded segment covers the cell's coordinates but no fact rows
    /// aggregated there.
    Empty,
    /// Nothing cached covers the cell (not yet loaded, load failed, or the
    /// request is not fully specified).
    Unresolved,
}

/// One failed batch from a load pass.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadFailure {
    pub batch: BatchKey,
    pub error: LoadError,
}

/// Summary of one [`BatchingCellReader::load_aggregations`] pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    /// Queries actually sent to the execution boundary.
    pub queries_issued: usize,
    /// Segments decoded and installed by this pass.
    pub segments_loaded: usize,
    /// Grouping levels satisfied from cache without querying.
    pub cache_hits: usize,
    /// Batches whose load failed; their cells stay unresolved for this pass.
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Batches concurrent cell requests and answers them from cached aggregate
/// segments.
///
/// One reader is owned by one evaluation context; the cache behind it is the
/// shared, thread-safe piece. The flow per evaluation pass is
/// [`record_cell_request`](Self::record_cell_request) for every needed cell,
/// one [`load_aggregations`](Self::load_aggregations), then
/// [`cell_value`](Self::cell_value) reads.
pub struct BatchingCellReader {
    catalog: Arc<StarCatalog>,
    cache: Arc<AggregationCache>,
    loader: AggregationLoader,
    strategy: Box<dyn MergeStrategy + Send + Sync>,
    grouping_sets_supported: bool,
    pending: BatchBuilder,
}

impl BatchingCellReader {
    pub fn new(
        catalog: Arc<StarCatalog>,
        cache: Arc<AggregationCache>,
        builder: Arc<dyn QueryBuilder>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let grouping_sets_supported = builder.dialect().supports_grouping_sets;
        Self {
            catalog,
            cache,
            loader: AggregationLoader::new(builder, executor),
            strategy: Box::new(GreedyChainStrategy),
            grouping_sets_supported,
            pending: BatchBuilder::new(),
        }
    }

    /// Replaces the merge-group planning strategy.
    pub fn with_strategy(mut self, strategy: impl MergeStrategy + Send + Sync + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Attaches an observability hook invoked with final query text.
    pub fn with_hook(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.loader.set_hook(hook);
        self
    }

    pub fn cache(&self) -> &Arc<AggregationCache> {
        &self.cache
    }

    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Validates and enqueues one cell request into its batch.
    pub fn record_cell_request(&mut self, request: CellRequest) -> Result<(), RequestError> {
        self.pending.record(request, &self.catalog)
    }

    /// Plans merge groups over the pending batches and loads them, consuming
    /// the pending state. Execution/decode failures are collected per batch,
    /// never raised as panics; failed batches are not retried.
    pub fn load_aggregations(&mut self) -> LoadReport {
        let batches = self.pending.take();
        let mut report = LoadReport::default();

        // Group batches by star, keeping first-seen star order so planning
        // and generated SQL stay reproducible.
        let mut by_star: Vec<(StarId, Vec<crate::batch::Batch>)> = Vec::new();
        for batch in batches {
            let star = batch.key().star;
            if let Some(slot) = by_star.iter_mut().find(|(s, _)| *s == star) {
                slot.1.push(batch);
            } else {
                by_star.push((star, vec![batch]));
            }
        }

        for (_star, star_batches) in by_star {
            let groups = self
                .strategy
                .plan(star_batches, self.grouping_sets_supported);
            for mut group in groups {
                let result = self.loader.load_group(&mut group, &self.catalog, &self.cache);
                report.queries_issued += result.queries_issued;
                report.cache_hits += result.cache_hits;
                for (key, outcome) in result.outcomes {
                    match outcome {
                        Ok(_) => report.segments_loaded += 1,
                        Err(error) => report.failures.push(LoadFailure { batch: key, error }),
                    }
                }
            }
        }
        // Cache hits are resolved levels, not freshly loaded segments.
        report.segments_loaded = report.segments_loaded.saturating_sub(report.cache_hits);
        report
    }

    /// Looks up the aggregated value for a fully-specified cell request from
    /// the cached segments.
    pub fn cell_value(&self, request: &CellRequest) -> CellValue {
        let Some(coordinate_pairs) = request.coordinates() else {
            return CellValue::Unresolved;
        };
        let Ok(key) = request.batch_key(&self.catalog) else {
            return CellValue::Unresolved;
        };
        let columns: Vec<_> = key.columns.iter().copied().collect();
        let coordinates: Vec<Datum> = coordinate_pairs.into_iter().map(|(_, v)| v).collect();

        for segment in self.cache.segments_for(key.star, &columns) {
            if !segment.measures().contains(&request.measure()) || !segment.covers(&coordinates) {
                continue;
            }
            return match segment.value(&coordinates, request.measure()) {
                Some(value) => CellValue::Found(value.clone()),
                None if request.ignore_missing() => CellValue::Found(Datum::Blank),
                None => CellValue::Empty,
            };
        }
        CellValue::Unresolved
    }
}

