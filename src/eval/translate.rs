//! Translation contract for non-reference backends.
//!
//! A backend that does not evaluate trees directly turns them into its
//! own native form. Whatever that form is, running it must be
//! observationally equivalent to [`evaluate`] and [`apply`]; the
//! differential tests in `tests/differential.rs` check this for the
//! closure-compiling backend below.
//!
//! [`evaluate`]: super::evaluate
//! [`apply`]: super::apply

use super::text::{searchable_text, TextTerms};
use crate::error::{DbError, Result};
use crate::expr::{
    combine_numbers, compare_values, get_path, same_kind, set_path, values_equal, Condition,
    Modification, OrdValue, NULL,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Turns expression trees into a backend's native query and update forms.
pub trait ExpressionTranslator {
    type Filter;
    type Update;

    fn translate_condition(&self, condition: &Condition) -> Result<Self::Filter>;
    fn translate_modification(&self, modification: &Modification) -> Result<Self::Update>;
}

type FilterFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type UpdateFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A condition compiled into a reusable predicate.
#[derive(Clone)]
pub struct CompiledFilter(FilterFn);

impl CompiledFilter {
    pub fn test(&self, value: &Value) -> bool {
        (self.0)(value)
    }
}

/// A modification compiled into a reusable update function.
#[derive(Clone)]
pub struct CompiledUpdate(UpdateFn);

impl CompiledUpdate {
    pub fn run(&self, value: Value) -> Result<Value> {
        (self.0)(value)
    }
}

/// Compiles trees into closures once, with sets and search terms
/// preprocessed, so repeated evaluation skips the tree walk.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompiledTranslator;

impl ExpressionTranslator for CompiledTranslator {
    type Filter = CompiledFilter;
    type Update = CompiledUpdate;

    fn translate_condition(&self, condition: &Condition) -> Result<CompiledFilter> {
        Ok(CompiledFilter(compile_condition(condition)))
    }

    fn translate_modification(&self, modification: &Modification) -> Result<CompiledUpdate> {
        Ok(CompiledUpdate(compile_modification(modification)))
    }
}

fn compile_condition(condition: &Condition) -> FilterFn {
    match condition {
        Condition::Always => Arc::new(|_: &Value| true),
        Condition::Never => Arc::new(|_: &Value| false),
        Condition::And(parts) => {
            let parts: Vec<FilterFn> = parts.iter().map(compile_condition).collect();
            Arc::new(move |v: &Value| parts.iter().all(|p| p(v)))
        }
        Condition::Or(parts) => {
            let parts: Vec<FilterFn> = parts.iter().map(compile_condition).collect();
            Arc::new(move |v: &Value| parts.iter().any(|p| p(v)))
        }
        Condition::Not(inner) => {
            let inner = compile_condition(inner);
            Arc::new(move |v: &Value| !inner(v))
        }
        Condition::Equal(expected) => {
            let expected = expected.clone();
            Arc::new(move |v: &Value| values_equal(v, &expected))
        }
        Condition::NotEqual(expected) => {
            let expected = expected.clone();
            Arc::new(move |v: &Value| !values_equal(v, &expected))
        }
        Condition::Inside(set) => {
            let set: BTreeSet<OrdValue> = set.iter().cloned().map(OrdValue).collect();
            Arc::new(move |v: &Value| set.contains(&OrdValue(v.clone())))
        }
        Condition::NotInside(set) => {
            let set: BTreeSet<OrdValue> = set.iter().cloned().map(OrdValue).collect();
            Arc::new(move |v: &Value| !set.contains(&OrdValue(v.clone())))
        }
        Condition::GreaterThan(bound) => compile_ordered(bound, |o| o == Ordering::Greater),
        Condition::LessThan(bound) => compile_ordered(bound, |o| o == Ordering::Less),
        Condition::GreaterOrEqual(bound) => compile_ordered(bound, |o| o != Ordering::Less),
        Condition::LessOrEqual(bound) => compile_ordered(bound, |o| o != Ordering::Greater),
        Condition::OnField { path, condition } => {
            let path = path.clone();
            let inner = compile_condition(condition);
            Arc::new(move |v: &Value| inner(get_path(v, &path).unwrap_or(&NULL)))
        }
        Condition::TextSearch { loose, exact, reject } => {
            let terms = TextTerms::new(loose, exact, reject);
            Arc::new(move |v: &Value| terms.matches(&searchable_text(v)))
        }
        Condition::Exists => Arc::new(|v: &Value| !v.is_null()),
        Condition::IfNotNull(inner) => {
            let inner = compile_condition(inner);
            Arc::new(move |v: &Value| !v.is_null() && inner(v))
        }
        Condition::StringContains { value, ignore_case } => {
            let ignore_case = *ignore_case;
            let needle = if ignore_case { value.to_lowercase() } else { value.clone() };
            Arc::new(move |v: &Value| match v.as_str() {
                Some(s) if ignore_case => s.to_lowercase().contains(&needle),
                Some(s) => s.contains(&needle),
                None => false,
            })
        }
        Condition::ListAllElements(inner) => {
            let inner = compile_condition(inner);
            Arc::new(move |v: &Value| v.as_array().map_or(false, |items| items.iter().all(|i| inner(i))))
        }
        Condition::ListAnyElements(inner) => {
            let inner = compile_condition(inner);
            Arc::new(move |v: &Value| v.as_array().map_or(false, |items| items.iter().any(|i| inner(i))))
        }
        Condition::ListSizeEquals(size) => {
            let size = *size;
            Arc::new(move |v: &Value| v.as_array().map_or(false, |items| items.len() == size))
        }
    }
}

fn compile_ordered(bound: &Value, accept: fn(Ordering) -> bool) -> FilterFn {
    let bound = bound.clone();
    Arc::new(move |v: &Value| same_kind(v, &bound) && accept(compare_values(v, &bound)))
}

fn compile_modification(modification: &Modification) -> UpdateFn {
    match modification {
        Modification::Assign(new) => {
            let new = new.clone();
            Arc::new(move |_: Value| -> Result<Value> { Ok(new.clone()) })
        }
        Modification::Increment(delta) => {
            let delta = delta.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                combine_numbers(&v, &delta, i64::checked_add, |a, b| a + b)
            })
        }
        Modification::Multiply(factor) => {
            let factor = factor.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                combine_numbers(&v, &factor, i64::checked_mul, |a, b| a * b)
            })
        }
        Modification::CoerceAtMost(bound) => {
            let bound = bound.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                Ok(if compare_values(&v, &bound) == Ordering::Greater { bound.clone() } else { v })
            })
        }
        Modification::CoerceAtLeast(bound) => {
            let bound = bound.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                Ok(if compare_values(&v, &bound) == Ordering::Less { bound.clone() } else { v })
            })
        }
        Modification::AppendList(items) => {
            let items = items.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                let mut list = list_of(v)?;
                list.extend(items.iter().cloned());
                Ok(Value::Array(list))
            })
        }
        Modification::AppendSet(items) => {
            let items = items.clone();
            Arc::new(move |v: Value| -> Result<Value> {
                let mut list = list_of(v)?;
                let mut present: BTreeSet<OrdValue> = list.iter().cloned().map(OrdValue).collect();
                for item in &items {
                    if present.insert(OrdValue(item.clone())) {
                        list.push(item.clone());
                    }
                }
                Ok(Value::Array(list))
            })
        }
        Modification::RemoveListItems(items) => {
            let items: BTreeSet<OrdValue> = items.iter().cloned().map(OrdValue).collect();
            Arc::new(move |v: Value| -> Result<Value> {
                let mut list = list_of(v)?;
                list.retain(|item| !items.contains(&OrdValue(item.clone())));
                Ok(Value::Array(list))
            })
        }
        Modification::RemoveListWhere(condition) => {
            let filter = compile_condition(condition);
            Arc::new(move |v: Value| -> Result<Value> {
                let mut list = list_of(v)?;
                list.retain(|item| !filter(item));
                Ok(Value::Array(list))
            })
        }
        Modification::ListPerElement { condition, modification } => {
            let filter = compile_condition(condition);
            let update = compile_modification(modification);
            Arc::new(move |v: Value| -> Result<Value> {
                list_of(v)?
                    .into_iter()
                    .map(|item| if filter(&item) { update(item) } else { Ok(item) })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            })
        }
        Modification::IfNotNull(inner) => {
            let inner = compile_modification(inner);
            Arc::new(move |v: Value| -> Result<Value> { if v.is_null() { Ok(v) } else { inner(v) } })
        }
        Modification::OnField { path, modification } => {
            let path = path.clone();
            let inner = compile_modification(modification);
            Arc::new(move |v: Value| -> Result<Value> {
                let current = get_path(&v, &path).cloned().unwrap_or(Value::Null);
                let updated = inner(current)?;
                set_path(v, &path, updated)
            })
        }
        Modification::Chain(steps) => {
            let steps: Vec<UpdateFn> = steps.iter().map(compile_modification).collect();
            Arc::new(move |v: Value| -> Result<Value> { steps.iter().try_fold(v, |acc, step| step(acc)) })
        }
    }
}

fn list_of(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(DbError::InvalidModification(format!(
            "list operation on non-list value {}",
            other
        ))),
    }
}
