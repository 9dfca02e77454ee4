use crate::error::RequestError;
use crate::predicate::ColumnPredicate;
use lattice_model::{ColumnId, Datum, MeasureId, StarCatalog, StarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A request for one aggregated measure value ("cell") at a specific
/// combination of dimension-column constraints.
///
/// Requests are append-only: constrained columns can be added until the
/// request is recorded, but never replaced: constraining the same column
/// twice is rejected with [`RequestError::DuplicateColumn`]. Callers that
/// want a combined constraint must combine predicates themselves before
/// constraining the column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRequest {
    measure: MeasureId,
    /// Constrained columns in insertion order. Signatures sort by column id,
    /// so insertion order never leaks into batching identity.
    constrained: Vec<(ColumnId, ColumnPredicate)>,
    /// When set, a loaded segment with no fact rows at this cell's
    /// coordinates reads back as `Blank` instead of a distinct "empty" state.
    ignore_missing: bool,
}

impl CellRequest {
    pub fn new(measure: MeasureId) -> Self {
        Self {
            measure,
            constrained: Vec::new(),
            ignore_missing: false,
        }
    }

    pub fn ignoring_missing(mut self) -> Self {
        self.ignore_missing = true;
        self
    }

    pub const fn measure(&self) -> MeasureId {
        self.measure
    }

    pub const fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }

    pub fn constrained_columns(&self) -> &[(ColumnId, ColumnPredicate)] {
        &self.constrained
    }

    /// Adds a constrained column. At most one predicate per column.
    pub fn constrain(
        &mut self,
        column: ColumnId,
        predicate: ColumnPredicate,
    ) -> Result<(), RequestError> {
        if self.constrained.iter().any(|(c, _)| *c == column) {
            return Err(RequestError::DuplicateColumn(column));
        }
        self.constrained.push((column, predicate));
        Ok(())
    }

    /// Builder-style [`CellRequest::constrain`].
    pub fn with(mut self, column: ColumnId, predicate: ColumnPredicate) -> Result<Self, RequestError> {
        self.constrain(column, predicate)?;
        Ok(self)
    }

    pub fn predicate_for(&self, column: ColumnId) -> Option<&ColumnPredicate> {
        self.constrained
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, p)| p)
    }

    /// The set of constrained column keys (values ignored).
    pub fn column_keys(&self) -> BTreeSet<ColumnId> {
        self.constrained.iter().map(|(c, _)| *c).collect()
    }

    /// Validates catalog references and computes the batching signature.
    pub fn batch_key(&self, catalog: &StarCatalog) -> Result<BatchKey, RequestError> {
        let measure = catalog
            .measure(self.measure)
            .map_err(|_| RequestError::UnknownMeasure(self.measure))?;
        for (column, _) in &self.constrained {
            let col = catalog
                .column(*column)
                .map_err(|_| RequestError::UnknownColumn(*column))?;
            if col.star != measure.star {
                return Err(RequestError::StarMismatch {
                    column: *column,
                    column_star: col.star,
                    measure: self.measure,
                    measure_star: measure.star,
                });
            }
        }
        let fact_table = catalog
            .star(measure.star)
            .map_err(|_| RequestError::UnknownMeasure(self.measure))?
            .fact_table
            .clone();
        Ok(BatchKey {
            star: measure.star,
            fact_table,
            columns: self.column_keys(),
        })
    }

    /// True when every constrained column pins a single value, i.e. the
    /// request denotes exactly one cell.
    pub fn is_fully_specified(&self) -> bool {
        self.constrained
            .iter()
            .all(|(_, p)| matches!(p, ColumnPredicate::Equals { .. }))
    }

    /// The cell's coordinates in ascending column-id order. `None` unless
    /// fully specified.
    pub fn coordinates(&self) -> Option<Vec<(ColumnId, Datum)>> {
        if !self.is_fully_specified() {
            return None;
        }
        let mut coords: Vec<(ColumnId, Datum)> = self
            .constrained
            .iter()
            .map(|(c, p)| match p {
                ColumnPredicate::Equals { value } => (*c, value.clone()),
                _ => unreachable!("is_fully_specified checked above"),
            })
            .collect();
        coords.sort_by_key(|(c, _)| *c);
        Some(coords)
    }
}

/// Batching identity: which batch a request belongs to.
///
/// Derived from constrained-column *keys*, never their values, so requests
/// for different predicate values on the same columns land in one batch and
/// can be answered by one query with one grouping level.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchKey {
    pub star: StarId,
    pub fact_table: String,
    pub columns: BTreeSet<ColumnId>,
}

/// Cache identity: additionally encodes the combined predicate values of one
/// grouping level.
///
/// Keys are structural, not hashed digests, so two keys collide only when
/// they are equal; "same key, structurally different segment" is an internal
/// invariant violation rather than a reachable state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentKey {
    pub star: StarId,
    /// Ascending column ids of the grouping level.
    pub columns: Vec<ColumnId>,
    /// Combined predicates aligned with `columns`.
    pub predicates: Vec<ColumnPredicate>,
    /// Measures answered by the segment, ascending.
    pub measures: Vec<MeasureId>,
}
