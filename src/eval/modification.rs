//! Reference semantics for modifications.

use super::condition::evaluate;
use crate::error::{DbError, Result};
use crate::expr::{combine_numbers, compare_values, get_path, set_path, values_equal, Modification};
use crate::types::{from_document, to_document, Model};
use serde_json::Value;
use std::cmp::Ordering;

/// Apply a modification to a document value.
pub fn apply(modification: &Modification, value: Value) -> Result<Value> {
    match modification {
        Modification::Assign(new) => Ok(new.clone()),
        Modification::Increment(delta) => {
            combine_numbers(&value, delta, i64::checked_add, |a, b| a + b)
        }
        Modification::Multiply(factor) => {
            combine_numbers(&value, factor, i64::checked_mul, |a, b| a * b)
        }
        Modification::CoerceAtMost(bound) => Ok(coerce(value, bound, Ordering::Greater)),
        Modification::CoerceAtLeast(bound) => Ok(coerce(value, bound, Ordering::Less)),
        Modification::AppendList(items) => {
            let mut list = into_list(value)?;
            list.extend(items.iter().cloned());
            Ok(Value::Array(list))
        }
        Modification::AppendSet(items) => {
            let mut list = into_list(value)?;
            for item in items {
                if !list.iter().any(|v| values_equal(v, item)) {
                    list.push(item.clone());
                }
            }
            Ok(Value::Array(list))
        }
        Modification::RemoveListItems(items) => {
            let mut list = into_list(value)?;
            list.retain(|v| !items.iter().any(|item| values_equal(v, item)));
            Ok(Value::Array(list))
        }
        Modification::RemoveListWhere(condition) => {
            let mut list = into_list(value)?;
            list.retain(|v| !evaluate(condition, v));
            Ok(Value::Array(list))
        }
        Modification::ListPerElement { condition, modification } => {
            let list = into_list(value)?;
            let updated = list
                .into_iter()
                .map(|item| {
                    if evaluate(condition, &item) {
                        apply(modification, item)
                    } else {
                        Ok(item)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(updated))
        }
        Modification::IfNotNull(inner) => {
            if value.is_null() {
                Ok(value)
            } else {
                apply(inner, value)
            }
        }
        Modification::OnField { path, modification } => {
            let current = get_path(&value, path).cloned().unwrap_or(Value::Null);
            let updated = apply(modification, current)?;
            set_path(value, path, updated)
        }
        Modification::Chain(steps) => steps.iter().try_fold(value, |acc, step| apply(step, acc)),
    }
}

fn coerce(value: Value, bound: &Value, out_of_range: Ordering) -> Value {
    if compare_values(&value, bound) == out_of_range {
        bound.clone()
    } else {
        value
    }
}

fn into_list(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(DbError::InvalidModification(format!(
            "list operation on non-list value {}",
            other
        ))),
    }
}

/// Apply a modification to a typed record.
///
/// Fails if the result no longer fits the record type or the identifier
/// changed.
pub fn apply_to<T: Model>(modification: &Modification, record: &T) -> Result<T> {
    let doc = apply(modification, to_document(record)?)?;
    let updated: T = from_document(doc)?;
    if updated.id() != record.id() {
        return Err(DbError::InvalidModification(format!(
            "identifier cannot change ({:?} -> {:?})",
            record.id(),
            updated.id()
        )));
    }
    Ok(updated)
}
