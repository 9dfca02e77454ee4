use crate::error::RequestError;
use crate::request::{BatchKey, CellRequest};
use lattice_model::{MeasureId, StarCatalog};
use std::collections::HashMap;

/// Lifecycle of a batch or merged grouping-set group.
///
/// `Failed` is terminal: a failed batch is discarded, never retried by this
/// layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Created,
    Populated,
    Loading,
    Loaded,
    Failed,
}

/// Cell requests sharing one star and one constrained-column key-set.
///
/// This identity is what lets a single aggregate query with one grouping
/// level satisfy every request in the batch: the grouped columns are the
/// shared key-set, and same-column predicates across requests are unioned
/// into one IN-list at load time.
#[derive(Clone, Debug)]
pub struct Batch {
    key: BatchKey,
    requests: Vec<CellRequest>,
    /// Distinct measures in first-seen order.
    measures: Vec<MeasureId>,
    state: BatchState,
}

impl Batch {
    fn new(key: BatchKey) -> Self {
        Self {
            key,
            requests: Vec::new(),
            measures: Vec::new(),
            state: BatchState::Created,
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn requests(&self) -> &[CellRequest] {
        &self.requests
    }

    pub fn measures(&self) -> &[MeasureId] {
        &self.measures
    }

    pub const fn state(&self) -> BatchState {
        self.state
    }

    fn add(&mut self, request: CellRequest) {
        if !self.measures.contains(&request.measure()) {
            self.measures.push(request.measure());
        }
        self.requests.push(request);
        self.state = BatchState::Populated;
    }

    pub(crate) fn mark_loading(&mut self) {
        debug_assert_eq!(self.state, BatchState::Populated);
        self.state = BatchState::Loading;
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.state = BatchState::Loaded;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = BatchState::Failed;
    }
}

/// Accumulates cell requests into batches keyed by [`BatchKey`].
///
/// Owned by a single evaluation context; no internal locking. Batches drain
/// in creation order so downstream planning and SQL generation are
/// deterministic regardless of map iteration order.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    batches: HashMap<BatchKey, Batch>,
    order: Vec<BatchKey>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Validates the request against the catalog and appends it to its
    /// batch, creating the batch on first sight of the signature.
    pub fn record(
        &mut self,
        request: CellRequest,
        catalog: &StarCatalog,
    ) -> Result<(), RequestError> {
        let key = request.batch_key(catalog)?;
        let batch = self.batches.entry(key.clone()).or_insert_with(|| {
            self.order.push(key.clone());
            Batch::new(key)
        });
        batch.add(request);
        Ok(())
    }

    /// Drains every pending batch, in creation order. Batches are single-use:
    /// once taken they are loaded and discarded, never mutated again.
    pub fn take(&mut self) -> Vec<Batch> {
        let mut out = Vec::with_capacity(self.order.len());
        for key in self.order.drain(..) {
            if let Some(batch) = self.batches.remove(&key) {
                out.push(batch);
            }
        }
        self.batches.clear();
        out
    }
}
