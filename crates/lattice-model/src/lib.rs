#![forbid(unsafe_code)]

//! In-memory star-schema model consumed by the Lattice aggregation engine.
//!
//! A [`StarCatalog`] holds one or more [`Star`]s: a fact table plus the
//! dimension tables joined to it, the dimension columns that requests may
//! constrain, and the measures that can be aggregated. The catalog is
//! read-only from the engine's perspective; how it is populated (schema
//! files, discovery, hand-built test fixtures) is the host's concern.
//!
//! Dimension coordinates and measure values are represented by [`Datum`],
//! which is `Eq + Ord + Hash` so it can serve as a map key and as part of
//! deterministic cache signatures.

pub mod star;
pub mod value;

pub use star::{
    Aggregator, CatalogError, ColumnId, DimensionJoin, MeasureId, Star, StarCatalog, StarColumn,
    StarId, StarMeasure,
};
pub use value::Datum;
