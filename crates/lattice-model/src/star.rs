use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown star id: {0:?}")]
    UnknownStar(StarId),
    #[error("unknown column id: {0:?}")]
    UnknownColumn(ColumnId),
    #[error("unknown measure id: {0:?}")]
    UnknownMeasure(MeasureId),
    #[error("column already registered on star {star:?}: {table}.{column}")]
    DuplicateColumn {
        star: StarId,
        table: String,
        column: String,
    },
    #[error("measure already registered on star {star:?}: {name}")]
    DuplicateMeasure { star: StarId, name: String },
    #[error("table {table} is not joined to star {star:?}")]
    UnknownTable { star: StarId, table: String },
}

/// Identifies a [`Star`] within its catalog.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StarId(pub u32);

/// Identifies a [`StarColumn`] within its catalog. Ids are catalog-scoped and
/// ordered, so sorted id lists are deterministic batch signatures.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ColumnId(pub u32);

/// Identifies a [`StarMeasure`] within its catalog.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MeasureId(pub u32);

/// How a dimension table joins to the star's fact table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionJoin {
    pub table: String,
    pub fact_key: String,
    pub dim_key: String,
}

/// A fact table plus the dimension tables joined to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Star {
    pub id: StarId,
    pub name: String,
    pub fact_table: String,
    pub dimensions: Vec<DimensionJoin>,
    pub columns: Vec<ColumnId>,
    pub measures: Vec<MeasureId>,
}

impl Star {
    /// True when `table` is the fact table or one of the joined dimensions.
    pub fn has_table(&self, table: &str) -> bool {
        self.fact_table == table || self.dimensions.iter().any(|d| d.table == table)
    }
}

/// A dimension column that cell requests may constrain and group by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarColumn {
    pub id: ColumnId,
    pub star: StarId,
    pub table: String,
    pub name: String,
}

/// SQL aggregate applied to a measure's fact-table expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl Aggregator {
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

/// An aggregated measure: a fact-table column plus its aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarMeasure {
    pub id: MeasureId,
    pub star: StarId,
    pub name: String,
    /// Column on the fact table the aggregator is applied to.
    pub expression: String,
    pub aggregator: Aggregator,
}

/// Registry of stars, columns and measures.
///
/// Ids are dense indexes assigned at registration time. The engine only ever
/// reads from the catalog; hosts build it up front and share it immutably
/// (typically behind an `Arc`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarCatalog {
    stars: Vec<Star>,
    columns: Vec<StarColumn>,
    measures: Vec<StarMeasure>,
}

impl StarCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_star(&mut self, name: impl Into<String>, fact_table: impl Into<String>) -> StarId {
        let id = StarId(self.stars.len() as u32);
        self.stars.push(Star {
            id,
            name: name.into(),
            fact_table: fact_table.into(),
            dimensions: Vec::new(),
            columns: Vec::new(),
            measures: Vec::new(),
        });
        id
    }

    pub fn add_dimension(
        &mut self,
        star: StarId,
        table: impl Into<String>,
        fact_key: impl Into<String>,
        dim_key: impl Into<String>,
    ) -> Result<(), CatalogError> {
        let star = self.star_mut(star)?;
        star.dimensions.push(DimensionJoin {
            table: table.into(),
            fact_key: fact_key.into(),
            dim_key: dim_key.into(),
        });
        Ok(())
    }

    /// Registers a constrainable column on `table`, which must already be
    /// the star's fact table or a joined dimension table.
    pub fn add_column(
        &mut self,
        star: StarId,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<ColumnId, CatalogError> {
        let table = table.into();
        let name = name.into();
        let star_ref = self.star(star)?;
        if !star_ref.has_table(&table) {
            return Err(CatalogError::UnknownTable { star, table });
        }
        if self.lookup_column(star, &table, &name).is_some() {
            return Err(CatalogError::DuplicateColumn {
                star,
                table,
                column: name,
            });
        }
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(StarColumn {
            id,
            star,
            table,
            name,
        });
        self.star_mut(star)?.columns.push(id);
        Ok(id)
    }

    pub fn add_measure(
        &mut self,
        star: StarId,
        name: impl Into<String>,
        expression: impl Into<String>,
        aggregator: Aggregator,
    ) -> Result<MeasureId, CatalogError> {
        let name = name.into();
        self.star(star)?;
        if self.lookup_measure(star, &name).is_some() {
            return Err(CatalogError::DuplicateMeasure { star, name });
        }
        let id = MeasureId(self.measures.len() as u32);
        self.measures.push(StarMeasure {
            id,
            star,
            name,
            expression: expression.into(),
            aggregator,
        });
        self.star_mut(star)?.measures.push(id);
        Ok(id)
    }

    pub fn star(&self, id: StarId) -> Result<&Star, CatalogError> {
        self.stars
            .get(id.0 as usize)
            .ok_or(CatalogError::UnknownStar(id))
    }

    pub fn column(&self, id: ColumnId) -> Result<&StarColumn, CatalogError> {
        self.columns
            .get(id.0 as usize)
            .ok_or(CatalogError::UnknownColumn(id))
    }

    pub fn measure(&self, id: MeasureId) -> Result<&StarMeasure, CatalogError> {
        self.measures
            .get(id.0 as usize)
            .ok_or(CatalogError::UnknownMeasure(id))
    }

    pub fn lookup_column(&self, star: StarId, table: &str, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .find(|c| c.star == star && c.table == table && c.name == name)
            .map(|c| c.id)
    }

    pub fn lookup_measure(&self, star: StarId, name: &str) -> Option<MeasureId> {
        self.measures
            .iter()
            .find(|m| m.star == star && m.name == name)
            .map(|m| m.id)
    }

    fn star_mut(&mut self, id: StarId) -> Result<&mut Star, CatalogError> {
        self.stars
            .get_mut(id.0 as usize)
            .ok_or(CatalogError::UnknownStar(id))
    }
}
