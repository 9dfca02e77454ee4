use crate::batch::Batch;
use crate::predicate::ColumnPredicate;
use crate::request::CellRequest;
use lattice_model::ColumnId;
use std::collections::BTreeMap;

/// One unit of work for the loader: a most-detailed base batch plus zero or
/// more rollup batches whose column sets nest inside it, loadable as a single
/// multi-level grouping-set query.
#[derive(Debug)]
pub struct MergeGroup {
    pub detailed: Batch,
    /// Outward from the base: each successive rollup's columns are a subset
    /// of the previous member's.
    pub rollups: Vec<Batch>,
}

impl MergeGroup {
    pub fn single(batch: Batch) -> Self {
        Self {
            detailed: batch,
            rollups: Vec::new(),
        }
    }

    /// Number of grouping levels the merged query will carry.
    pub fn level_count(&self) -> usize {
        1 + self.rollups.len()
    }

    /// Batches in level order: detailed first, then rollups outward.
    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        std::iter::once(&self.detailed).chain(self.rollups.iter())
    }

    pub(crate) fn batches_mut(&mut self) -> impl Iterator<Item = &mut Batch> {
        std::iter::once(&mut self.detailed).chain(self.rollups.iter_mut())
    }
}

/// Combines a batch's per-request predicates into one predicate per column:
/// same-column value predicates union into an IN-list.
pub(crate) fn combined_predicates(batch: &Batch) -> BTreeMap<ColumnId, ColumnPredicate> {
    let mut combined: BTreeMap<ColumnId, ColumnPredicate> = BTreeMap::new();
    for request in batch.requests() {
        fold_request(&mut combined, request);
    }
    combined
}

fn fold_request(combined: &mut BTreeMap<ColumnId, ColumnPredicate>, request: &CellRequest) {
    for (column, predicate) in request.constrained_columns() {
        combined
            .entry(*column)
            .and_modify(|existing| *existing = existing.union(predicate))
            .or_insert_with(|| predicate.clone());
    }
}

/// Decides how a set of same-star batches decomposes into [`MergeGroup`]s.
///
/// Strategies must be deterministic: for a fixed input batch list and
/// capability flag, the decomposition (group membership *and* order) must be
/// reproducible, since generated SQL is asserted on in tests.
pub trait MergeStrategy {
    fn plan(&self, batches: Vec<Batch>, grouping_sets_supported: bool) -> Vec<MergeGroup>;
}

/// Default strategy: stable-sort batches by descending constrained-column
/// count (ties broken by column-id list), then first-fit each batch into the
/// group whose innermost member's columns are a superset of its own.
///
/// A batch joins a group only when rolling it up is semantically safe:
/// - its combined predicates equal the detailed batch's on every shared
///   column, and
/// - the detailed batch leaves the columns this batch lacks unconstrained.
///
/// Otherwise the merged query's WHERE clause (taken from the detailed level)
/// would narrow the fact subset this rollup aggregates over.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyChainStrategy;

impl MergeStrategy for GreedyChainStrategy {
    fn plan(&self, batches: Vec<Batch>, grouping_sets_supported: bool) -> Vec<MergeGroup> {
        if !grouping_sets_supported {
            return batches.into_iter().map(MergeGroup::single).collect();
        }

        let mut ordered = batches;
        ordered.sort_by(|a, b| {
            b.key()
                .columns
                .len()
                .cmp(&a.key().columns.len())
                .then_with(|| a.key().cmp(b.key()))
        });

        let mut groups: Vec<MergeGroup> = Vec::new();
        'next_batch: for batch in ordered {
            for group in &mut groups {
                let innermost = group.rollups.last().unwrap_or(&group.detailed);
                if can_roll_up(&batch, innermost, &group.detailed) {
                    group.rollups.push(batch);
                    continue 'next_batch;
                }
            }
            groups.push(MergeGroup::single(batch));
        }
        groups
    }
}

/// May `candidate` become the next (coarser) grouping level after
/// `innermost`, in a group whose WHERE clause comes from `detailed`?
fn can_roll_up(candidate: &Batch, innermost: &Batch, detailed: &Batch) -> bool {
    if candidate.key().star != detailed.key().star {
        return false;
    }
    let candidate_cols = &candidate.key().columns;
    let inner_cols = &innermost.key().columns;
    // Chain requirement: strictly nested column sets. Equal sets belong to
    // the same batch by construction, so only proper subsets roll up.
    if candidate_cols.len() >= inner_cols.len() || !candidate_cols.is_subset(inner_cols) {
        return false;
    }

    let candidate_preds = combined_predicates(candidate);
    let detailed_preds = combined_predicates(detailed);
    for column in &detailed.key().columns {
        let detailed_pred = detailed_preds.get(column).unwrap_or(&ColumnPredicate::Any);
        match candidate_preds.get(column) {
            Some(candidate_pred) => {
                if candidate_pred != detailed_pred {
                    return false;
                }
            }
            // Column absent from the rollup level: the detailed WHERE must
            // not constrain it, or the rollup would aggregate a narrowed
            // fact subset.
            None => {
                if detailed_pred.is_constraining() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchBuilder;
    use crate::predicate::ColumnPredicate;
    use lattice_model::{Aggregator, MeasureId, StarCatalog};
    use pretty_assertions::assert_eq;

    struct Fixture {
        catalog: StarCatalog,
        unit_sales: MeasureId,
        year: ColumnId,
        family: ColumnId,
        department: ColumnId,
    }

    fn fixture() -> Fixture {
        let mut catalog = StarCatalog::new();
        let star = catalog.add_star("Sales", "sales_fact_1997");
        catalog
            .add_dimension(star, "time_by_day", "time_id", "time_id")
            .unwrap();
        catalog
            .add_dimension(star, "product_class", "product_id", "product_id")
            .unwrap();
        let year = catalog.add_column(star, "time_by_day", "the_year").unwrap();
        let family = catalog
            .add_column(star, "product_class", "product_family")
            .unwrap();
        let department = catalog
            .add_column(star, "product_class", "product_department")
            .unwrap();
        let unit_sales = catalog
            .add_measure(star, "Unit Sales", "unit_sales", Aggregator::Sum)
            .unwrap();
        Fixture {
            catalog,
            unit_sales,
            year,
            family,
            department,
        }
    }

    fn chain_batches(fx: &Fixture) -> Vec<Batch> {
        let mut builder = BatchBuilder::new();
        // Coarse: grouped by family only.
        let mut coarse = CellRequest::new(fx.unit_sales);
        coarse
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        builder.record(coarse, &fx.catalog).unwrap();
        // Detailed: family + department, family values matching.
        let mut detailed = CellRequest::new(fx.unit_sales);
        detailed
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        detailed
            .constrain(fx.department, ColumnPredicate::Any)
            .unwrap();
        builder.record(detailed, &fx.catalog).unwrap();
        builder.take()
    }

    #[test]
    fn chain_merges_when_dialect_supports_grouping_sets() {
        let fx = fixture();
        let groups = GreedyChainStrategy.plan(chain_batches(&fx), true);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].level_count(), 2);
        assert_eq!(groups[0].detailed.key().columns.len(), 2);
        assert_eq!(groups[0].rollups[0].key().columns.len(), 1);
    }

    #[test]
    fn chain_splits_without_grouping_set_support() {
        let fx = fixture();
        let groups = GreedyChainStrategy.plan(chain_batches(&fx), false);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.rollups.is_empty()));
    }

    #[test]
    fn incomparable_key_sets_never_merge() {
        let fx = fixture();
        let mut builder = BatchBuilder::new();
        let mut by_year = CellRequest::new(fx.unit_sales);
        by_year
            .constrain(fx.year, ColumnPredicate::equals("1997"))
            .unwrap();
        builder.record(by_year, &fx.catalog).unwrap();
        let mut by_family = CellRequest::new(fx.unit_sales);
        by_family
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        builder.record(by_family, &fx.catalog).unwrap();

        let groups = GreedyChainStrategy.plan(builder.take(), true);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn mismatched_shared_predicates_block_rollup() {
        let fx = fixture();
        let mut builder = BatchBuilder::new();
        let mut coarse = CellRequest::new(fx.unit_sales);
        coarse
            .constrain(fx.family, ColumnPredicate::equals("Drink"))
            .unwrap();
        builder.record(coarse, &fx.catalog).unwrap();
        let mut detailed = CellRequest::new(fx.unit_sales);
        detailed
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        detailed
            .constrain(fx.department, ColumnPredicate::Any)
            .unwrap();
        builder.record(detailed, &fx.catalog).unwrap();

        let groups = GreedyChainStrategy.plan(builder.take(), true);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn constrained_extra_columns_block_rollup() {
        let fx = fixture();
        let mut builder = BatchBuilder::new();
        let mut coarse = CellRequest::new(fx.unit_sales);
        coarse
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        builder.record(coarse, &fx.catalog).unwrap();
        // Detailed batch constrains the department the coarse level lacks.
        let mut detailed = CellRequest::new(fx.unit_sales);
        detailed
            .constrain(fx.family, ColumnPredicate::equals("Food"))
            .unwrap();
        detailed
            .constrain(fx.department, ColumnPredicate::equals("Dairy"))
            .unwrap();
        builder.record(detailed, &fx.catalog).unwrap();

        let groups = GreedyChainStrategy.plan(builder.take(), true);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn three_level_chain_nests_outward() {
        let fx = fixture();
        let mut builder = BatchBuilder::new();
        for columns in [
            vec![fx.year, fx.family, fx.department],
            vec![fx.year],
            vec![fx.year, fx.family],
        ] {
            let mut request = CellRequest::new(fx.unit_sales);
            for column in columns {
                request.constrain(column, ColumnPredicate::Any).unwrap();
            }
            builder.record(request, &fx.catalog).unwrap();
        }

        let groups = GreedyChainStrategy.plan(builder.take(), true);
        assert_eq!(groups.len(), 1);
        let sizes: Vec<usize> = groups[0]
            .batches()
            .map(|b| b.key().columns.len())
            .collect();
        assert_eq!(sizes, vec![3, 2, 1]);
    }

    #[test]
    fn predicate_combination_unions_values() {
        let fx = fixture();
        let mut builder = BatchBuilder::new();
        for family in ["Food", "Drink", "Non-Consumable"] {
            let mut request = CellRequest::new(fx.unit_sales);
            request
                .constrain(fx.family, ColumnPredicate::equals(family))
                .unwrap();
            builder.record(request, &fx.catalog).unwrap();
        }
        let batches = builder.take();
        assert_eq!(batches.len(), 1);
        let combined = combined_predicates(&batches[0]);
        assert_eq!(
            combined.get(&fx.family),
            Some(&ColumnPredicate::in_list(["Drink", "Food", "Non-Consumable"]))
        );
    }
}
