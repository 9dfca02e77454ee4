use lattice_model::{ColumnId, MeasureId, StarId};
use thiserror::Error;

/// Rejections raised while a cell request is being constructed or recorded.
///
/// These are fatal to the offending request only; a malformed request never
/// enters a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("column {0:?} is already constrained on this request")]
    DuplicateColumn(ColumnId),
    #[error("unknown column reference: {0:?}")]
    UnknownColumn(ColumnId),
    #[error("unknown measure reference: {0:?}")]
    UnknownMeasure(MeasureId),
    #[error("column {column:?} belongs to star {column_star:?}, measure {measure:?} to {measure_star:?}")]
    StarMismatch {
        column: ColumnId,
        column_star: StarId,
        measure: MeasureId,
        measure_star: StarId,
    },
}

/// Why a batch (or merged grouping-set group) failed to load.
///
/// A failed batch is terminal for the current evaluation pass: its cells stay
/// unresolved and no retry happens at this layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("query execution failed: {0}")]
    Execute(#[from] ExecuteError),
    #[error("failed to decode result rows: {0}")]
    Decode(String),
    #[error("query generation failed: {0}")]
    Build(#[from] QueryBuildError),
}

/// Reported by the external execution boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecuteError {
    pub message: String,
}

impl ExecuteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Reported by the query-text builder boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryBuildError {
    #[error("catalog lookup failed: {0}")]
    Catalog(String),
    #[error("query has no grouping levels")]
    NoLevels,
    #[error("query has no measures")]
    NoMeasures,
}

impl From<lattice_model::CatalogError> for QueryBuildError {
    fn from(err: lattice_model::CatalogError) -> Self {
        Self::Catalog(err.to_string())
    }
}
