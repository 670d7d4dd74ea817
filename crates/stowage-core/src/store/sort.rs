// ── Keyed multi-field ORDER BY ──

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use convert_case::{Case, Casing};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::model::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Parsed `field [asc|desc], ...` query. The first clause is the primary
/// key; later clauses break ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortQuery {
    clauses: Vec<(String, Direction)>,
}

impl SortQuery {
    pub fn clauses(&self) -> &[(String, Direction)] {
        &self.clauses
    }

    /// Memoization key: the clause tokens camel-cased, direction always
    /// spelled out (`"age desc, name"` -> `"ageDescNameAsc"`).
    pub fn view_key(&self) -> String {
        self.to_string().replace(',', " ").to_case(Case::Camel)
    }

    pub(crate) fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (field, dir) in &self.clauses {
            let ord = compare_values(a.value(field), b.value(field));
            let ord = match dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort of `records` by this query.
    pub(crate) fn apply(&self, records: &[Arc<Record>]) -> Vec<Arc<Record>> {
        let mut sorted = records.to_vec();
        sorted.sort_by(|a, b| self.compare(a, b));
        sorted
    }
}

impl FromStr for SortQuery {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut clauses = Vec::new();
        for raw in s.split(',') {
            let mut tokens = raw.split_whitespace();
            let Some(field) = tokens.next() else {
                continue;
            };
            let dir = match tokens.next() {
                Some(d) => d
                    .parse::<Direction>()
                    .map_err(|_| CoreError::invalid(format!("bad sort direction {d:?}")))?,
                None => Direction::Asc,
            };
            if let Some(extra) = tokens.next() {
                return Err(CoreError::invalid(format!(
                    "unexpected token {extra:?} in sort clause {raw:?}"
                )));
            }
            clauses.push((field.to_owned(), dir));
        }
        if clauses.is_empty() {
            return Err(CoreError::invalid("sort query is empty"));
        }
        Ok(Self { clauses })
    }
}

impl fmt::Display for SortQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, (field, dir)) in self.clauses.iter().enumerate() {
            if n > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field} {dir}")?;
        }
        Ok(())
    }
}

fn rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over optional JSON values: missing/null, booleans,
/// numbers, strings, arrays, objects. Objects compare equal.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x
            .iter()
            .zip(y)
            .map(|(p, q)| compare_values(Some(p), Some(q)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}
