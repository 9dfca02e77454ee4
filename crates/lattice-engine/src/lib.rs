#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Cell-request batching and aggregate loading for a star-schema (OLAP)
//! query engine.
//!
//! Many concurrently-issued requests for aggregated measure values ("cells")
//! are grouped into the fewest possible aggregate queries, optionally merged
//! into multi-level grouping-set queries when the dialect supports them,
//! executed through the external query boundary, and cached so repeated or
//! overlapping requests never re-query.
//!
//! The flow per evaluation pass:
//!
//! 1. Build [`CellRequest`]s against a shared [`lattice_model::StarCatalog`]
//!    and feed them to a [`BatchingCellReader`].
//! 2. [`BatchingCellReader::load_aggregations`] batches compatible requests,
//!    plans grouping-set merges via a [`MergeStrategy`], and loads segments
//!    through the [`QueryBuilder`] / [`QueryExecutor`] boundary.
//! 3. Read values back with [`BatchingCellReader::cell_value`]; cells a
//!    failed load left behind come back [`CellValue::Unresolved`].
//!
//! The [`AggregationCache`] is the only shared mutable state: it is safe
//! under concurrent lookup/insert/flush and enforces at most one in-flight
//! load per value signature (single-flight).

pub mod batch;
pub mod cache;
pub mod combos;
pub mod error;
pub mod grouping;
pub mod loader;
pub mod predicate;
pub mod reader;
pub mod request;
pub mod sql;

pub use batch::{Batch, BatchBuilder, BatchState};
pub use cache::{AggregationCache, CacheOutcome, LoadPermit, MeasureRow, Segment};
pub use combos::CartesianProduct;
pub use error::{ExecuteError, LoadError, QueryBuildError, RequestError};
pub use grouping::{GreedyChainStrategy, MergeGroup, MergeStrategy};
pub use loader::{AggregationLoader, GroupLoadResult};
pub use predicate::{Bound, ColumnPredicate};
pub use reader::{BatchingCellReader, CellValue, LoadFailure, LoadReport};
pub use request::{BatchKey, CellRequest, SegmentKey};
pub use sql::{
    AggregateQuery, Dialect, DialectKind, GroupingLevel, QueryBuilder, QueryExecutor, QueryHook,
    QuoteStyle, RecordingHook, SqlQueryBuilder,
};
