//! Reference semantics for conditions.

use super::text::{searchable_text, TextTerms};
use crate::error::Result;
use crate::expr::{compare_values, get_path, same_kind, values_equal, Condition, NULL};
use crate::types::{to_document, Model};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate a condition against a document value.
///
/// Ordering comparisons only hold between values of the same kind; a
/// string is neither greater nor less than a number.
pub fn evaluate(condition: &Condition, value: &Value) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Never => false,
        Condition::And(parts) => parts.iter().all(|c| evaluate(c, value)),
        Condition::Or(parts) => parts.iter().any(|c| evaluate(c, value)),
        Condition::Not(inner) => !evaluate(inner, value),
        Condition::Equal(expected) => values_equal(value, expected),
        Condition::NotEqual(expected) => !values_equal(value, expected),
        Condition::Inside(set) => set.iter().any(|v| values_equal(value, v)),
        Condition::NotInside(set) => !set.iter().any(|v| values_equal(value, v)),
        Condition::GreaterThan(bound) => ordered(value, bound, |o| o == Ordering::Greater),
        Condition::LessThan(bound) => ordered(value, bound, |o| o == Ordering::Less),
        Condition::GreaterOrEqual(bound) => ordered(value, bound, |o| o != Ordering::Less),
        Condition::LessOrEqual(bound) => ordered(value, bound, |o| o != Ordering::Greater),
        Condition::OnField { path, condition } => {
            evaluate(condition, get_path(value, path).unwrap_or(&NULL))
        }
        Condition::TextSearch { loose, exact, reject } => {
            TextTerms::new(loose, exact, reject).matches(&searchable_text(value))
        }
        Condition::Exists => !value.is_null(),
        Condition::IfNotNull(inner) => !value.is_null() && evaluate(inner, value),
        Condition::StringContains { value: needle, ignore_case } => match value.as_str() {
            Some(s) if *ignore_case => s.to_lowercase().contains(&needle.to_lowercase()),
            Some(s) => s.contains(needle.as_str()),
            None => false,
        },
        Condition::ListAllElements(inner) => value
            .as_array()
            .map(|items| items.iter().all(|v| evaluate(inner, v)))
            .unwrap_or(false),
        Condition::ListAnyElements(inner) => value
            .as_array()
            .map(|items| items.iter().any(|v| evaluate(inner, v)))
            .unwrap_or(false),
        Condition::ListSizeEquals(size) => value
            .as_array()
            .map(|items| items.len() == *size)
            .unwrap_or(false),
    }
}

fn ordered(value: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    same_kind(value, bound) && accept(compare_values(value, bound))
}

/// Evaluate a condition against a typed record.
pub fn matches<T: Model>(condition: &Condition, record: &T) -> Result<bool> {
    Ok(evaluate(condition, &to_document(record)?))
}
