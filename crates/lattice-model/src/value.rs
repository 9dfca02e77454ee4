use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single dimension coordinate or measure value.
///
/// `Datum` is totally ordered and hashable so that segment coordinates and
/// predicate value-sets can live in `BTreeSet`s and serve as cache-key
/// components. Floats go through [`OrderedFloat`]; NaN compares equal to
/// itself and sorts after every other number. Ints and floats compare
/// numerically across kinds, with equal magnitudes ordering ints first so
/// the ordering stays consistent with (derived) equality.
///
/// This is intentionally serde-friendly since it may cross IPC boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Datum {
    Blank,
    Bool(bool),
    Int(i64),
    Number(OrderedFloat<f64>),
    Text(String),
}

impl Datum {
    pub fn number(value: f64) -> Self {
        Self::Number(OrderedFloat(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub const fn is_blank(&self) -> bool {
        matches!(self, Self::Blank)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Number(n) => Some(n.0),
            _ => None,
        }
    }

    /// Rank used to order values of different kinds relative to each other.
    ///
    /// Numeric kinds sort first, then text, booleans, and finally blanks, so
    /// grouped output and IN-lists have a stable, unsurprising shape.
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Int(_) | Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Bool(_) => 2,
            Self::Blank => 3,
        }
    }

    /// Human-friendly representation, used in diagnostics and reports.
    pub fn display_string(&self) -> String {
        match self {
            Self::Blank => "(blank)".to_string(),
            Self::Bool(b) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            Self::Int(i) => i.to_string(),
            Self::Number(n) => n.0.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// SQL literal rendering with single-quote escaping for text.
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Blank => "NULL".to_string(),
            Self::Bool(b) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            Self::Int(i) => i.to_string(),
            Self::Number(n) => n.0.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            // Numerically equal Int/Number pairs are still distinct values
            // (Eq is derived), so ties break by kind to keep Ord and Eq
            // consistent for ordered collections.
            (Self::Int(a), Self::Number(b)) => {
                OrderedFloat(*a as f64).cmp(b).then(Ordering::Less)
            }
            (Self::Number(a), Self::Int(b)) => {
                a.cmp(&OrderedFloat(*b as f64)).then(Ordering::Greater)
            }
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Blank, Self::Blank) => Ordering::Equal,
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Self::number(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cross_kind_ordering_is_total_and_stable() {
        let mut values = vec![
            Datum::Blank,
            Datum::text("Drink"),
            Datum::Bool(false),
            Datum::Int(3),
            Datum::number(2.5),
            Datum::text("Food"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Datum::number(2.5),
                Datum::Int(3),
                Datum::text("Drink"),
                Datum::text("Food"),
                Datum::Bool(false),
                Datum::Blank,
            ]
        );
    }

    #[test]
    fn int_and_number_compare_numerically() {
        assert!(Datum::Int(2) < Datum::number(2.5));
        assert!(Datum::Int(3) > Datum::number(2.5));
        // Equal magnitudes stay distinct, ints first.
        assert!(Datum::Int(2) < Datum::number(2.0));
    }

    #[test]
    fn sql_literal_escapes_quotes() {
        assert_eq!(Datum::text("O'Brien").sql_literal(), "'O''Brien'");
        assert_eq!(Datum::Blank.sql_literal(), "NULL");
    }

    #[test]
    fn serde_round_trip() {
        let datum = Datum::text("1997");
        let json = serde_json::to_string(&datum).unwrap();
        assert_eq!(json, r#"{"type":"text","value":"1997"}"#);
        assert_eq!(serde_json::from_str::<Datum>(&json).unwrap(), datum);

        let datum = Datum::number(191940.0);
        let json = serde_json::to_string(&datum).unwrap();
        assert_eq!(json, r#"{"type":"number","value":191940.0}"#);
        assert_eq!(serde_json::from_str::<Datum>(&json).unwrap(), datum);
    }
}
