#![allow(dead_code)]

//! Shared FoodMart-style fixture: a `Sales` star over `sales_fact_1997`
//! with time and product dimensions, plus a scriptable executor.

use lattice_engine::{CellRequest, ColumnPredicate, ExecuteError, QueryExecutor};
use lattice_model::{Aggregator, ColumnId, Datum, MeasureId, StarCatalog, StarId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DEPARTMENTS: [&str; 22] = [
    "Periodicals",
    "Breakfast Foods",
    "Eggs",
    "Household",
    "Alcoholic Beverages",
    "Beverages",
    "Frozen Foods",
    "Dairy",
    "Health and Hygiene",
    "Seafood",
    "Baked Goods",
    "Checkout",
    "Canned Products",
    "Baking Goods",
    "Meat",
    "Carousel",
    "Starchy Foods",
    "Deli",
    "Produce",
    "Canned Foods",
    "Snacks",
    "Snack Foods",
];

pub struct FoodMart {
    pub catalog: Arc<StarCatalog>,
    pub star: StarId,
    pub year: ColumnId,
    pub family: ColumnId,
    pub department: ColumnId,
    pub gender: ColumnId,
    pub unit_sales: MeasureId,
    pub store_sales: MeasureId,
}

pub fn foodmart() -> FoodMart {
    let mut catalog = StarCatalog::new();
    let star = catalog.add_star("Sales", "sales_fact_1997");
    catalog
        .add_dimension(star, "time_by_day", "time_id", "time_id")
        .unwrap();
    catalog
        .add_dimension(star, "product_class", "product_id", "product_id")
        .unwrap();
    catalog
        .add_dimension(star, "customer", "customer_id", "customer_id")
        .unwrap();
    let year = catalog.add_column(star, "time_by_day", "the_year").unwrap();
    let family = catalog
        .add_column(star, "product_class", "product_family")
        .unwrap();
    let department = catalog
        .add_column(star, "product_class", "product_department")
        .unwrap();
    let gender = catalog.add_column(star, "customer", "gender").unwrap();
    let unit_sales = catalog
        .add_measure(star, "Unit Sales", "unit_sales", Aggregator::Sum)
        .unwrap();
    let store_sales = catalog
        .add_measure(star, "Store Sales", "store_sales", Aggregator::Sum)
        .unwrap();
    FoodMart {
        catalog: Arc::new(catalog),
        star,
        year,
        family,
        department,
        gender,
        unit_sales,
        store_sales,
    }
}

/// Builds a request constraining each `(column, value)` pair with equality.
pub fn request(measure: MeasureId, constraints: &[(ColumnId, &str)]) -> CellRequest {
    let mut req = CellRequest::new(measure);
    for (column, value) in constraints {
        req.constrain(*column, ColumnPredicate::equals(*value))
            .unwrap();
    }
    req
}

/// Executor fed from a script of responses, one per `execute` call.
///
/// An exhausted script returns empty result sets. Execution counts are
/// observable, so tests can assert "exactly k queries ran".
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<Vec<Vec<Datum>>, ExecuteError>>>,
    executions: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, rows: Vec<Vec<Datum>>) {
        self.responses.lock().unwrap().push_back(Ok(rows));
    }

    pub fn fail_next(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(ExecuteError::new(message)));
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn execute(&self, _sql: &str) -> Result<Vec<Vec<Datum>>, ExecuteError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
