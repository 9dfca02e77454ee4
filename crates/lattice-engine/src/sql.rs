//! The dialect capability table and the query-generation / execution
//! boundary.
//!
//! Query text is produced by a [`QueryBuilder`], a pure function of the
//! [`AggregateQuery`] it is handed, with no hidden state, so generated text is
//! reproducible and can be asserted on in tests. Execution goes through the
//! opaque synchronous [`QueryExecutor`] boundary. An optional [`QueryHook`]
//! observes final query text immediately before execution; it must not alter
//! query semantics.

use crate::error::{ExecuteError, QueryBuildError};
use crate::predicate::ColumnPredicate;
use lattice_model::{ColumnId, Datum, MeasureId, StarCatalog, StarId};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Mutex;

/// Identifies a SQL dialect for capability lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialectKind {
    Generic,
    Postgres,
    MySql,
    Oracle,
}

/// Identifier quoting style used when rendering query text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteStyle {
    DoubleQuote,
    Backtick,
}

impl QuoteStyle {
    fn quote(self, ident: &str) -> String {
        match self {
            Self::DoubleQuote => format!("\"{ident}\""),
            Self::Backtick => format!("`{ident}`"),
        }
    }
}

/// Capability table for one dialect: explicit feature flags instead of
/// runtime type inspection of a dialect object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialect {
    pub kind: DialectKind,
    pub supports_grouping_sets: bool,
    pub quote_style: QuoteStyle,
}

impl Dialect {
    pub const fn generic() -> Self {
        Self {
            kind: DialectKind::Generic,
            supports_grouping_sets: false,
            quote_style: QuoteStyle::DoubleQuote,
        }
    }

    pub const fn postgres() -> Self {
        Self {
            kind: DialectKind::Postgres,
            supports_grouping_sets: true,
            quote_style: QuoteStyle::DoubleQuote,
        }
    }

    pub const fn mysql() -> Self {
        Self {
            kind: DialectKind::MySql,
            supports_grouping_sets: false,
            quote_style: QuoteStyle::Backtick,
        }
    }

    pub const fn oracle() -> Self {
        Self {
            kind: DialectKind::Oracle,
            supports_grouping_sets: true,
            quote_style: QuoteStyle::DoubleQuote,
        }
    }
}

/// One grouping granularity within an aggregate query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupingLevel {
    /// Ascending column ids.
    pub columns: Vec<ColumnId>,
    /// Combined predicates aligned with `columns`.
    pub predicates: Vec<ColumnPredicate>,
}

/// A fully-specified aggregate query: one or more grouping levels over one
/// star, plus the measures to aggregate. Levels are ordered most-detailed
/// first; every later level's columns are a subset of the first's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateQuery {
    pub star: StarId,
    pub levels: Vec<GroupingLevel>,
    /// Ascending measure ids.
    pub measures: Vec<MeasureId>,
}

/// Deterministically renders an [`AggregateQuery`] as query text.
pub trait QueryBuilder: Send + Sync {
    fn dialect(&self) -> Dialect;
    fn build(&self, query: &AggregateQuery, catalog: &StarCatalog)
        -> Result<String, QueryBuildError>;
}

/// Executes query text against the backing store. Opaque and blocking from
/// the engine's perspective; timeout and retry policy live behind this
/// boundary.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str) -> Result<Vec<Vec<Datum>>, ExecuteError>;
}

/// Observes final query text immediately before execution.
pub trait QueryHook: Send + Sync {
    fn on_query(&self, sql: &str);
}

impl<F: Fn(&str) + Send + Sync> QueryHook for F {
    fn on_query(&self, sql: &str) {
        self(sql);
    }
}

/// Hook that records every observed query, for tests and tracing. Control
/// returns normally; assertions run against [`RecordingHook::queries`]
/// afterwards.
#[derive(Debug, Default)]
pub struct RecordingHook {
    queries: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("recording hook poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.queries.lock().expect("recording hook poisoned").len()
    }

    pub fn clear(&self) {
        self.queries.lock().expect("recording hook poisoned").clear();
    }
}

impl QueryHook for RecordingHook {
    fn on_query(&self, sql: &str) {
        self.queries
            .lock()
            .expect("recording hook poisoned")
            .push(sql.to_string());
    }
}

/// Reference ANSI-style emitter.
///
/// Output shape, single level:
///
/// ```sql
/// select "t"."c" as "c0", sum("fact"."m") as "m0"
/// from "fact" join "t" on "fact"."k" = "t"."k"
/// where "t"."c" in ('a', 'b')
/// group by "t"."c"
/// ```
///
/// Multi-level queries additionally select one `grouping()` flag per base
/// column (aliased `g0..gN`) and group by `grouping sets`; result rows are
/// routed to levels by the flag bitmask.
#[derive(Clone, Debug)]
pub struct SqlQueryBuilder {
    dialect: Dialect,
}

impl SqlQueryBuilder {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn column_expr(&self, catalog: &StarCatalog, id: ColumnId) -> Result<String, QueryBuildError> {
        let column = catalog.column(id)?;
        let q = self.dialect.quote_style;
        Ok(format!("{}.{}", q.quote(&column.table), q.quote(&column.name)))
    }

    fn render_predicate(expr: &str, predicate: &ColumnPredicate) -> Option<String> {
        match predicate {
            ColumnPredicate::Equals { value } => Some(format!("{expr} = {}", value.sql_literal())),
            ColumnPredicate::InList { values } => {
                let list: Vec<String> = values.iter().map(Datum::sql_literal).collect();
                Some(format!("{expr} in ({})", list.join(", ")))
            }
            ColumnPredicate::Range { lower, upper } => {
                let mut parts = Vec::new();
                if let Some(bound) = lower {
                    let op = if bound.inclusive { ">=" } else { ">" };
                    parts.push(format!("{expr} {op} {}", bound.value.sql_literal()));
                }
                if let Some(bound) = upper {
                    let op = if bound.inclusive { "<=" } else { "<" };
                    parts.push(format!("{expr} {op} {}", bound.value.sql_literal()));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" and "))
                }
            }
            ColumnPredicate::Any => None,
        }
    }
}

impl QueryBuilder for SqlQueryBuilder {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn build(
        &self,
        query: &AggregateQuery,
        catalog: &StarCatalog,
    ) -> Result<String, QueryBuildError> {
        let Some(base) = query.levels.first() else {
            return Err(QueryBuildError::NoLevels);
        };
        if query.measures.is_empty() {
            return Err(QueryBuildError::NoMeasures);
        }
        let star = catalog.star(query.star)?;
        let q = self.dialect.quote_style;
        let multi_level = query.levels.len() > 1;

        // Select list: base columns, grouping flags (multi-level only),
        // measures. Aliases are positional and stable.
        let mut select = Vec::new();
        let mut base_exprs = Vec::new();
        for (i, column) in base.columns.iter().enumerate() {
            let expr = self.column_expr(catalog, *column)?;
            select.push(format!("{expr} as {}", q.quote(&format!("c{i}"))));
            base_exprs.push(expr);
        }
        if multi_level {
            for (i, expr) in base_exprs.iter().enumerate() {
                select.push(format!("grouping({expr}) as {}", q.quote(&format!("g{i}"))));
            }
        }
        for (i, measure) in query.measures.iter().enumerate() {
            let m = catalog.measure(*measure)?;
            select.push(format!(
                "{}({}.{}) as {}",
                m.aggregator.sql_name(),
                q.quote(&star.fact_table),
                q.quote(&m.expression),
                q.quote(&format!("m{i}"))
            ));
        }

        // Join only the dimension tables the base level actually touches.
        let mut used_tables = Vec::new();
        for column in &base.columns {
            let table = &catalog.column(*column)?.table;
            if *table != star.fact_table && !used_tables.contains(table) {
                used_tables.push(table.clone());
            }
        }
        let mut from = q.quote(&star.fact_table);
        for join in &star.dimensions {
            if used_tables.contains(&join.table) {
                write!(
                    from,
                    " join {} on {}.{} = {}.{}",
                    q.quote(&join.table),
                    q.quote(&star.fact_table),
                    q.quote(&join.fact_key),
                    q.quote(&join.table),
                    q.quote(&join.dim_key)
                )
                .expect("writing to string cannot fail");
            }
        }

        // WHERE from the detailed level only; merge eligibility guarantees
        // rollup levels share these constraints.
        let mut conditions = Vec::new();
        for (expr, predicate) in base_exprs.iter().zip(&base.predicates) {
            if let Some(cond) = Self::render_predicate(expr, predicate) {
                conditions.push(cond);
            }
        }

        let group_by = if multi_level {
            let mut sets = Vec::new();
            for level in &query.levels {
                let exprs: Result<Vec<String>, QueryBuildError> = level
                    .columns
                    .iter()
                    .map(|c| self.column_expr(catalog, *c))
                    .collect();
                sets.push(format!("({})", exprs?.join(", ")));
            }
            format!("grouping sets ({})", sets.join(", "))
        } else {
            base_exprs.join(", ")
        };

        let mut sql = format!("select {} from {from}", select.join(", "));
        if !conditions.is_empty() {
            write!(sql, " where {}", conditions.join(" and "))
                .expect("writing to string cannot fail");
        }
        if !base_exprs.is_empty() {
            write!(sql, " group by {group_by}").expect("writing to string cannot fail");
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_model::Aggregator;
    use pretty_assertions::assert_eq;

    fn fixture() -> (StarCatalog, AggregateQuery) {
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
        let unit_sales = catalog
            .add_measure(star, "Unit Sales", "unit_sales", Aggregator::Sum)
            .unwrap();
        let query = AggregateQuery {
            star,
            levels: vec![GroupingLevel {
                columns: vec![year, family],
                predicates: vec![
                    ColumnPredicate::equals("1997"),
                    ColumnPredicate::in_list(["Drink", "Food"]),
                ],
            }],
            measures: vec![unit_sales],
        };
        (catalog, query)
    }

    #[test]
    fn renders_single_level_query() {
        let (catalog, query) = fixture();
        let sql = SqlQueryBuilder::new(Dialect::postgres())
            .build(&query, &catalog)
            .unwrap();
        assert_eq!(
            sql,
            "select \"time_by_day\".\"the_year\" as \"c0\", \
             \"product_class\".\"product_family\" as \"c1\", \
             sum(\"sales_fact_1997\".\"unit_sales\") as \"m0\" \
             from \"sales_fact_1997\" \
             join \"time_by_day\" on \"sales_fact_1997\".\"time_id\" = \"time_by_day\".\"time_id\" \
             join \"product_class\" on \"sales_fact_1997\".\"product_id\" = \"product_class\".\"product_id\" \
             where \"time_by_day\".\"the_year\" = '1997' \
             and \"product_class\".\"product_family\" in ('Drink', 'Food') \
             group by \"time_by_day\".\"the_year\", \"product_class\".\"product_family\""
        );
    }

    #[test]
    fn renders_grouping_sets_with_flags() {
        let (catalog, mut query) = fixture();
        let year = query.levels[0].columns[0];
        query.levels[0].predicates = vec![ColumnPredicate::Any, ColumnPredicate::Any];
        query.levels.push(GroupingLevel {
            columns: vec![year],
            predicates: vec![ColumnPredicate::Any],
        });
        let sql = SqlQueryBuilder::new(Dialect::postgres())
            .build(&query, &catalog)
            .unwrap();
        assert!(sql.contains("grouping(\"time_by_day\".\"the_year\") as \"g0\""));
        assert!(sql.contains("grouping(\"product_class\".\"product_family\") as \"g1\""));
        assert!(sql.contains(
            "group by grouping sets ((\"time_by_day\".\"the_year\", \
             \"product_class\".\"product_family\"), (\"time_by_day\".\"the_year\"))"
        ));
        assert!(!sql.contains("where"));
    }

    #[test]
    fn mysql_uses_backtick_quoting() {
        let (catalog, query) = fixture();
        let sql = SqlQueryBuilder::new(Dialect::mysql())
            .build(&query, &catalog)
            .unwrap();
        assert!(sql.starts_with("select `time_by_day`.`the_year` as `c0`"));
    }

    #[test]
    fn same_input_renders_identical_text() {
        let (catalog, query) = fixture();
        let builder = SqlQueryBuilder::new(Dialect::postgres());
        assert_eq!(
            builder.build(&query, &catalog).unwrap(),
            builder.build(&query, &catalog).unwrap()
        );
    }

    #[test]
    fn dialect_serde_round_trip() {
        let dialect = Dialect::postgres();
        let json = serde_json::to_string(&dialect).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"postgres","supportsGroupingSets":true,"quoteStyle":"doubleQuote"}"#
        );
        assert_eq!(serde_json::from_str::<Dialect>(&json).unwrap(), dialect);
    }

    #[test]
    fn empty_queries_are_rejected() {
        let (catalog, query) = fixture();
        let builder = SqlQueryBuilder::new(Dialect::postgres());
        let no_levels = AggregateQuery {
            star: query.star,
            levels: vec![],
            measures: query.measures.clone(),
        };
        assert_eq!(
            builder.build(&no_levels, &catalog),
            Err(QueryBuildError::NoLevels)
        );
        let no_measures = AggregateQuery {
            star: query.star,
            levels: query.levels.clone(),
            measures: vec![],
        };
        assert_eq!(
            builder.build(&no_measures, &catalog),
            Err(QueryBuildError::NoMeasures)
        );
    }
}
