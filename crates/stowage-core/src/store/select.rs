// ── Predicate selection and join modes ──
//
// `Where` is an ordered set of field clauses. Equality and comparison
// clauses are plain data and may run on a blocking worker; `Test`
// closures always run inline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::sort::compare_values;
use crate::error::CoreError;
use crate::model::Record;

pub type Predicate = Arc<dyn Fn(Option<&Value>, &Record) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Substring of a string field, or element of an array field.
    Contains,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "~",
        }
    }

    fn eval(self, field: Option<&Value>, rhs: &Value) -> bool {
        match self {
            Self::Eq => field == Some(rhs),
            Self::Ne => field != Some(rhs),
            Self::Contains => match (field, rhs) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), v) => items.contains(v),
                _ => false,
            },
            Self::Gt | Self::Ge | Self::Lt | Self::Le => {
                // Ordering only applies between values of the same kind.
                let comparable = matches!(
                    (field, rhs),
                    (Some(Value::Number(_)), Value::Number(_))
                        | (Some(Value::String(_)), Value::String(_))
                        | (Some(Value::Bool(_)), Value::Bool(_))
                );
                if !comparable {
                    return false;
                }
                let ord = compare_values(field, Some(rhs));
                match self {
                    Self::Gt => ord.is_gt(),
                    Self::Ge => ord.is_ge(),
                    Self::Lt => ord.is_lt(),
                    _ => ord.is_le(),
                }
            }
        }
    }
}

/// A single field condition.
#[derive(Clone)]
pub enum Clause {
    /// Strict equality; a missing field never matches.
    Equals(Value),
    Compare(CompareOp, Value),
    /// Arbitrary predicate over `(field value, record)`.
    Test(Predicate),
}

impl Clause {
    pub fn test<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &Record) -> bool + Send + Sync + 'static,
    {
        Self::Test(Arc::new(f))
    }

    fn matches(&self, field: Option<&Value>, record: &Record) -> bool {
        match self {
            Self::Equals(v) => field == Some(v),
            Self::Compare(op, v) => op.eval(field, v),
            Self::Test(f) => f(field, record),
        }
    }
}

impl fmt::Debug for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Self::Compare(op, v) => f.debug_tuple("Compare").field(op).field(v).finish(),
            Self::Test(_) => f.write_str("Test(..)"),
        }
    }
}

/// Conjunction of field clauses.
#[derive(Debug, Clone, Default)]
pub struct Where {
    clauses: Vec<(String, Clause)>,
}

impl Where {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, clause: Clause) -> Self {
        self.clauses.push((field.into(), clause));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Clause::Equals(value.into()))
    }

    pub fn compare(self, field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.with(field, Clause::Compare(op, value.into()))
    }

    pub fn test<F>(self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<&Value>, &Record) -> bool + Send + Sync + 'static,
    {
        self.with(field, Clause::test(f))
    }

    pub fn push(&mut self, field: impl Into<String>, clause: Clause) {
        self.clauses.push((field.into(), clause));
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Clause)] {
        &self.clauses
    }

    /// `true` when no clause is a closure.
    pub fn is_portable(&self) -> bool {
        !self
            .clauses
            .iter()
            .any(|(_, c)| matches!(c, Clause::Test(_)))
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(field, clause)| clause.matches(record.value(field), record))
    }

    pub(crate) fn apply(&self, records: &[Arc<Record>]) -> Vec<Arc<Record>> {
        records
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect()
    }

    /// Parse a `field<op>value` expression such as `age>=50`, `name=John`
    /// or `tags~rust`. The value is read as JSON when it parses, otherwise
    /// as a string.
    pub fn parse_expr(expr: &str) -> Result<(String, Clause), CoreError> {
        const OPS: [CompareOp; 7] = [
            CompareOp::Ge,
            CompareOp::Le,
            CompareOp::Ne,
            CompareOp::Contains,
            CompareOp::Gt,
            CompareOp::Lt,
            CompareOp::Eq,
        ];
        let (pos, op) = OPS
            .iter()
            .filter_map(|op| expr.find(op.symbol()).map(|pos| (pos, *op)))
            .min_by_key(|(pos, _)| *pos)
            .ok_or_else(|| CoreError::invalid(format!("no operator in {expr:?}")))?;

        let field = expr[..pos].trim();
        if field.is_empty() {
            return Err(CoreError::invalid(format!("no field in {expr:?}")));
        }
        let raw = expr[pos + op.symbol().len()..].trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        let clause = match op {
            CompareOp::Eq => Clause::Equals(value),
            other => Clause::Compare(other, value),
        };
        Ok((field.to_owned(), clause))
    }
}

/// Which side of a join drives the result rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JoinMode {
    #[default]
    Inner,
    Left,
    Right,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Field;
    use indexmap::IndexMap;
    use serde_json::json;

    fn rec(fields: Value) -> Record {
        let data: IndexMap<String, Field> = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Field::Value(v.clone())))
            .collect();
        Record::new("k".into(), data)
    }

    #[test]
    fn equality_is_strict() {
        let r = rec(json!({"sex": "male", "age": 51}));
        assert!(Where::new().eq("sex", "male").matches(&r));
        assert!(!Where::new().eq("age", "51").matches(&r));
        assert!(!Where::new().eq("missing", Value::Null).matches(&r));
    }

    #[test]
    fn all_clauses_must_pass() {
        let r = rec(json!({"sex": "male", "age": 51}));
        let w = Where::new()
            .eq("sex", "male")
            .compare("age", CompareOp::Gt, 50);
        assert!(w.matches(&r));
        let w = w.compare("age", CompareOp::Lt, 51);
        assert!(!w.matches(&r));
    }

    #[test]
    fn ordering_needs_matching_kinds() {
        let r = rec(json!({"age": 51, "name": "Ann"}));
        assert!(CompareOp::Ge.eval(r.value("age"), &json!(51)));
        assert!(!CompareOp::Gt.eval(r.value("age"), &json!("50")));
        assert!(CompareOp::Lt.eval(r.value("name"), &json!("Bob")));
        assert!(!CompareOp::Lt.eval(None, &json!(1)));
    }

    #[test]
    fn contains_matches_substrings_and_elements() {
        let r = rec(json!({"name": "Johnny", "tags": ["a", "b"]}));
        assert!(CompareOp::Contains.eval(r.value("name"), &json!("ohn")));
        assert!(CompareOp::Contains.eval(r.value("tags"), &json!("b")));
        assert!(!CompareOp::Contains.eval(r.value("tags"), &json!("c")));
    }

    #[test]
    fn closures_see_value_and_record() {
        let r = rec(json!({"age": 60}));
        let w = Where::new().test("age", |v, rec| {
            v.and_then(Value::as_i64).is_some_and(|a| a > 50) && rec.key == "k"
        });
        assert!(w.matches(&r));
        assert!(!w.is_portable());
        assert!(Where::new().eq("a", 1).is_portable());
    }

    #[test]
    fn parses_expressions() {
        let (field, clause) = Where::parse_expr("age>=50").unwrap();
        assert_eq!(field, "age");
        assert!(matches!(clause, Clause::Compare(CompareOp::Ge, ref v) if *v == json!(50)));

        let (field, clause) = Where::parse_expr("name = John").unwrap();
        assert_eq!(field, "name");
        assert!(matches!(clause, Clause::Equals(ref v) if *v == json!("John")));

        let (_, clause) = Where::parse_expr("tags~rust").unwrap();
        assert!(matches!(clause, Clause::Compare(CompareOp::Contains, _)));

        assert!(Where::parse_expr("age").is_err());
        assert!(Where::parse_expr("=5").is_err());
    }

    #[test]
    fn join_mode_parses_lowercase() {
        assert_eq!("left".parse::<JoinMode>().unwrap(), JoinMode::Left);
        assert_eq!(JoinMode::Right.to_string(), "right");
    }
}
