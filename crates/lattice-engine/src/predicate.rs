use lattice_model::Datum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A predicate over one constrained column's values.
///
/// A request's full predicate set is the implicit conjunction of its
/// constrained columns; predicates for the *same* column across requests in
/// one batch are combined with [`ColumnPredicate::union`] before a query is
/// generated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColumnPredicate {
    /// Single-value equality.
    Equals { value: Datum },
    /// Value-set membership. The set is ordered, so IN-lists render
    /// deterministically regardless of how requests arrived.
    InList { values: BTreeSet<Datum> },
    /// Range with optional inclusive/exclusive bounds.
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    /// Unconstrained: every value matches.
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bound {
    pub value: Datum,
    pub inclusive: bool,
}

impl Bound {
    pub const fn inclusive(value: Datum) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub const fn exclusive(value: Datum) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }
}

impl ColumnPredicate {
    pub fn equals(value: impl Into<Datum>) -> Self {
        Self::Equals {
            value: value.into(),
        }
    }

    pub fn in_list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Datum>,
    {
        Self::InList {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// True unless the predicate is [`ColumnPredicate::Any`].
    pub const fn is_constraining(&self) -> bool {
        !matches!(self, Self::Any)
    }

    /// Does `value` satisfy this predicate?
    pub fn contains(&self, value: &Datum) -> bool {
        match self {
            Self::Equals { value: v } => v == value,
            Self::InList { values } => values.contains(value),
            Self::Range { lower, upper } => {
                let above = lower.as_ref().is_none_or(|b| {
                    if b.inclusive {
                        value >= &b.value
                    } else {
                        value > &b.value
                    }
                });
                let below = upper.as_ref().is_none_or(|b| {
                    if b.inclusive {
                        value <= &b.value
                    } else {
                        value < &b.value
                    }
                });
                above && below
            }
            Self::Any => true,
        }
    }

    /// The value set this predicate enumerates, if it enumerates one.
    pub fn values(&self) -> Option<BTreeSet<Datum>> {
        match self {
            Self::Equals { value } => {
                let mut set = BTreeSet::new();
                set.insert(value.clone());
                Some(set)
            }
            Self::InList { values } => Some(values.clone()),
            Self::Range { .. } | Self::Any => None,
        }
    }

    /// Combines two same-column predicates into one that admits every value
    /// either admits.
    ///
    /// Value predicates union into a single IN-list (collapsing back to
    /// `Equals` for a singleton). Unions involving `Any` or a `Range` cannot
    /// be represented as a value list; they widen to `Any`, which over-fetches
    /// and relies on per-cell containment checks at lookup time.
    pub fn union(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        match (self.values(), other.values()) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                if a.len() == 1 {
                    Self::Equals {
                        value: a.into_iter().next().unwrap(),
                    }
                } else {
                    Self::InList { values: a }
                }
            }
            _ => Self::Any,
        }
    }
}
