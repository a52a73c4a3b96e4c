//! Document values, field paths and the total value ordering.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;

/// Shared null used when a path does not resolve.
pub(crate) static NULL: Value = Value::Null;

/// Dotted path to a field inside a document (`"address.city"`).
///
/// The empty path addresses the document itself.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        FieldPath(path.into())
    }

    /// The path of the document itself.
    pub fn root() -> Self {
        FieldPath(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> Vec<&str> {
        if self.0.is_empty() {
            Vec::new()
        } else {
            self.0.split('.').collect()
        }
    }

    /// Extend this path with a relative path.
    pub fn join(&self, rest: &FieldPath) -> FieldPath {
        match (self.is_root(), rest.is_root()) {
            (true, _) => rest.clone(),
            (_, true) => self.clone(),
            _ => FieldPath(format!("{}.{}", self.0, rest.0)),
        }
    }

    pub(crate) fn from_segments(segments: &[&str]) -> FieldPath {
        FieldPath(segments.join("."))
    }

    /// All proper ancestors, outermost first (`a`, `a.b` for `a.b.c`).
    pub fn ancestors(&self) -> Vec<FieldPath> {
        let segments = self.segments();
        (1..segments.len())
            .map(|n| FieldPath::from_segments(&segments[..n]))
            .collect()
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath(s.to_string())
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        FieldPath(s)
    }
}

/// Resolve a path inside a document. Missing keys resolve to `None`.
pub fn get_path<'a>(doc: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    get_segments(doc, &path.segments())
}

pub(crate) fn get_segments<'a>(doc: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Replace the value at `path`, creating intermediate objects for missing
/// or null parents.
pub fn set_path(doc: Value, path: &FieldPath, value: Value) -> Result<Value> {
    set_segments(doc, &path.segments(), value)
}

pub(crate) fn set_segments(doc: Value, segments: &[&str], value: Value) -> Result<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value);
    };

    let mut obj = match doc {
        Value::Object(obj) => obj,
        Value::Null => Map::new(),
        other => {
            return Err(DbError::InvalidModification(format!(
                "cannot set field '{}' on non-object value {}",
                head, other
            )))
        }
    };

    let child = obj.remove(*head).unwrap_or(Value::Null);
    let updated = set_segments(child, rest, value)?;
    obj.insert(head.to_string(), updated);
    Ok(Value::Object(obj))
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// True when both values belong to the same kind (number, string, ...).
pub fn same_kind(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Total order over documents.
///
/// null < bool < number < string < array < object. Numbers compare
/// numerically (`1 == 1.0`), arrays and objects lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_values(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut left: Vec<_> = x.iter().collect();
            let mut right: Vec<_> = y.iter().collect();
            left.sort_by(|l, r| l.0.cmp(r.0));
            right.sort_by(|l, r| l.0.cmp(r.0));
            for ((lk, lv), (rk, rv)) in left.iter().zip(right.iter()) {
                match lk.cmp(rk).then_with(|| compare_values(lv, rv)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            left.len().cmp(&right.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Value equality under [`compare_values`].
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// A document value usable as an ordered map key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrdValue(pub Value);

impl PartialEq for OrdValue {
    fn eq(&self, other: &Self) -> bool {
        values_equal(&self.0, &other.0)
    }
}

impl Eq for OrdValue {}

impl PartialOrd for OrdValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

impl From<Value> for OrdValue {
    fn from(v: Value) -> Self {
        OrdValue(v)
    }
}

/// Arithmetic on two JSON numbers, staying integral where both sides are.
pub(crate) fn combine_numbers(
    current: &Value,
    operand: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let (Value::Number(a), Value::Number(b)) = (current, operand) else {
        return Err(DbError::InvalidModification(format!(
            "numeric operation on non-numeric values {} and {}",
            current, operand
        )));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Ok(Value::from(result));
        }
    }

    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    Number::from_f64(float_op(x, y))
        .map(Value::Number)
        .ok_or_else(|| DbError::InvalidModification("numeric result is not finite".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_and_set_nested() {
        let doc = json!({"address": {"city": "Oslo"}, "name": "a"});
        let path = FieldPath::from("address.city");
        assert_eq!(get_path(&doc, &path), Some(&json!("Oslo")));

        let doc = set_path(doc, &path, json!("Bergen")).unwrap();
        assert_eq!(doc["address"]["city"], "Bergen");
        assert_eq!(doc["name"], "a");
    }

    #[test]
    fn test_set_creates_missing_parents() {
        let doc = set_path(json!({}), &FieldPath::from("a.b"), json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let result = set_path(json!({"a": 3}), &FieldPath::from("a.b"), json!(1));
        assert!(matches!(result, Err(DbError::InvalidModification(_))));
    }

    #[test]
    fn test_ordering_across_kinds() {
        let mut values = vec![json!("b"), json!(2), json!(null), json!(true), json!(1.5), json!("a")];
        values.sort_by(compare_values);
        assert_eq!(values, vec![json!(null), json!(true), json!(1.5), json!(2), json!("a"), json!("b")]);
    }

    #[test]
    fn test_integer_float_equality() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_ancestors() {
        let path = FieldPath::from("a.b.c");
        assert_eq!(path.ancestors(), vec![FieldPath::from("a"), FieldPath::from("a.b")]);
        assert!(FieldPath::root().segments().is_empty());
    }
}
