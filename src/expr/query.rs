//! Sorted, paginated views over a collection.

use super::condition::Condition;
use super::value::{compare_values, get_path, FieldPath, NULL};
use crate::types::{to_document, Model};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

fn ascending_default() -> bool {
    true
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPart {
    pub field: FieldPath,
    #[serde(default = "ascending_default")]
    pub ascending: bool,
}

impl SortPart {
    pub fn ascending(field: impl Into<FieldPath>) -> Self {
        Self { field: field.into(), ascending: true }
    }

    pub fn descending(field: impl Into<FieldPath>) -> Self {
        Self { field: field.into(), ascending: false }
    }
}

/// Condition plus ordering and window.
///
/// Records tie-break on the identifier, so the order is total.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub order_by: Vec<SortPart>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(condition: Condition) -> Self {
        Self { condition, ..Default::default() }
    }

    pub fn order_by(mut self, sort: SortPart) -> Self {
        self.order_by.push(sort);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// AND a row-level security condition onto the caller's condition.
    pub fn restricted_by(mut self, security: Condition) -> Self {
        self.condition = Condition::and([self.condition, security]);
        self
    }

    /// Whether the window can cut records off.
    pub fn is_windowed(&self) -> bool {
        self.skip > 0 || self.limit.is_some()
    }

    /// Order two documents by `order_by`, then by identifier.
    pub fn compare_documents(&self, a: &Value, b: &Value, id_field: &FieldPath) -> Ordering {
        for part in &self.order_by {
            let left = get_path(a, &part.field).unwrap_or(&NULL);
            let right = get_path(b, &part.field).unwrap_or(&NULL);
            let ordering = compare_values(left, right);
            let ordering = if part.ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        compare_values(
            get_path(a, id_field).unwrap_or(&NULL),
            get_path(b, id_field).unwrap_or(&NULL),
        )
    }

    /// Total order over records: `order_by`, then identifier.
    pub fn comparator<T: Model>(&self) -> impl Fn(&T, &T) -> Ordering + '_ {
        move |a: &T, b: &T| {
            let left = to_document(a).unwrap_or(Value::Null);
            let right = to_document(b).unwrap_or(Value::Null);
            self.compare_documents(&left, &right, T::id_field())
        }
    }

    /// True when only the identifier orders results.
    pub fn is_id_ordered(&self, id_field: &FieldPath) -> bool {
        match self.order_by.as_slice() {
            [] => true,
            [only] => only.ascending && &only.field == id_field,
            _ => false,
        }
    }
}
