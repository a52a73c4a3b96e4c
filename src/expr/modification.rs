//! Serializable update trees.

use super::condition::Condition;
use super::value::{get_segments, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An update applied to the value in focus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Modification {
    Assign(Value),
    Increment(Value),
    Multiply(Value),
    CoerceAtMost(Value),
    CoerceAtLeast(Value),
    AppendList(Vec<Value>),
    /// Append items not already present.
    AppendSet(Vec<Value>),
    RemoveListItems(Vec<Value>),
    RemoveListWhere(Condition),
    ListPerElement {
        condition: Condition,
        modification: Box<Modification>,
    },
    /// Leave null untouched, otherwise apply the inner modification.
    IfNotNull(Box<Modification>),
    OnField {
        path: FieldPath,
        modification: Box<Modification>,
    },
    /// Sequential composition; each step sees the previous step's output.
    Chain(Vec<Modification>),
}

impl Modification {
    pub fn field(path: impl Into<FieldPath>, modification: Modification) -> Modification {
        Modification::OnField {
            path: path.into(),
            modification: Box::new(modification),
        }
    }

    /// `path = value`
    pub fn assign(path: impl Into<FieldPath>, value: impl Into<Value>) -> Modification {
        Modification::field(path, Modification::Assign(value.into()))
    }

    /// `path += delta`
    pub fn increment(path: impl Into<FieldPath>, delta: impl Into<Value>) -> Modification {
        Modification::field(path, Modification::Increment(delta.into()))
    }

    pub fn chain(steps: impl IntoIterator<Item = Modification>) -> Modification {
        let mut parts = Vec::new();
        for step in steps {
            match step {
                Modification::Chain(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        if parts.len() == 1 {
            parts.pop().unwrap_or(Modification::Chain(Vec::new()))
        } else {
            Modification::Chain(parts)
        }
    }

    /// Conservative check whether applying this modification may change
    /// the value at `path`.
    ///
    /// Writing an ancestor counts as touching every descendant, and writing
    /// a descendant counts as touching the ancestor.
    pub fn touches(&self, path: &FieldPath) -> bool {
        self.touches_at(&path.segments())
    }

    fn touches_at(&self, target: &[&str]) -> bool {
        match self {
            Modification::Chain(steps) => steps.iter().any(|s| s.touches_at(target)),
            Modification::IfNotNull(inner) => inner.touches_at(target),
            Modification::OnField { path, modification } => {
                let segments = path.segments();
                if segments.starts_with(target) {
                    true
                } else if target.starts_with(&segments) {
                    modification.touches_at(&target[segments.len()..])
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    /// The part of this modification that writes exactly `path`, relative
    /// to that path.
    ///
    /// `Chain` steps are flattened; an ancestor `Assign` yields an `Assign`
    /// of the corresponding sub-value. Ancestor operations that cannot be
    /// expressed at `path` yield `None` even though [`touches`] is true.
    ///
    /// [`touches`]: Modification::touches
    pub fn for_field(&self, path: &FieldPath) -> Option<Modification> {
        self.for_segments(&path.segments())
    }

    fn for_segments(&self, target: &[&str]) -> Option<Modification> {
        if target.is_empty() {
            return Some(self.clone());
        }
        match self {
            Modification::Chain(steps) => {
                let mut parts: Vec<Modification> =
                    steps.iter().filter_map(|s| s.for_segments(target)).collect();
                match parts.len() {
                    0 => None,
                    1 => parts.pop(),
                    _ => Some(Modification::Chain(parts)),
                }
            }
            Modification::OnField { path, modification } => {
                let segments = path.segments();
                if target.starts_with(&segments) {
                    modification.for_segments(&target[segments.len()..])
                } else if segments.starts_with(target) {
                    Some(Modification::OnField {
                        path: FieldPath::from_segments(&segments[target.len()..]),
                        modification: modification.clone(),
                    })
                } else {
                    None
                }
            }
            Modification::IfNotNull(inner) => inner.for_segments(target),
            Modification::Assign(value) => Some(Modification::Assign(
                get_segments(value, target).cloned().unwrap_or(Value::Null),
            )),
            _ => None,
        }
    }

    /// Every absolute field path this modification writes or reads.
    pub fn paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.collect_paths(&FieldPath::root(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
        match self {
            Modification::Chain(steps) => {
                for step in steps {
                    step.collect_paths(prefix, out);
                }
            }
            Modification::IfNotNull(inner) => inner.collect_paths(prefix, out),
            Modification::RemoveListWhere(condition) => condition.collect_paths(prefix, out),
            Modification::ListPerElement {
                condition,
                modification,
            } => {
                condition.collect_paths(prefix, out);
                modification.collect_paths(prefix, out);
            }
            Modification::OnField { path, modification } => {
                let full = prefix.join(path);
                out.push(full.clone());
                modification.collect_paths(&full, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_touches_exact_and_unrelated() {
        let m = Modification::assign("email", "a@b.c");
        assert!(m.touches(&"email".into()));
        assert!(!m.touches(&"name".into()));
    }

    #[test]
    fn test_ancestor_assign_touches_descendants() {
        let m = Modification::assign("address", json!({"city": "Oslo"}));
        assert!(m.touches(&"address.city".into()));

        let whole = Modification::Assign(json!({"_id": "1"}));
        assert!(whole.touches(&"anything".into()));
    }

    #[test]
    fn test_descendant_write_touches_ancestor() {
        let m = Modification::field("address", Modification::assign("city", "Oslo"));
        assert!(m.touches(&"address".into()));
        assert!(m.touches(&"address.city".into()));
        assert!(!m.touches(&"address.zip".into()));
    }

    #[test]
    fn test_for_field_flattens_chain() {
        let m = Modification::chain([
            Modification::assign("name", "x"),
            Modification::increment("age", 1),
            Modification::assign("name", "y"),
        ]);
        assert_eq!(
            m.for_field(&"name".into()),
            Some(Modification::Chain(vec![
                Modification::Assign(json!("x")),
                Modification::Assign(json!("y")),
            ]))
        );
        assert_eq!(m.for_field(&"age".into()), Some(Modification::Increment(json!(1))));
        assert_eq!(m.for_field(&"email".into()), None);
    }

    #[test]
    fn test_for_field_of_ancestor_assign() {
        let m = Modification::assign("address", json!({"city": "Oslo"}));
        assert_eq!(
            m.for_field(&"address.city".into()),
            Some(Modification::Assign(json!("Oslo")))
        );
    }

    #[test]
    fn test_paths() {
        let m = Modification::field("tags", Modification::RemoveListWhere(Condition::Equal(json!("x"))));
        assert_eq!(m.paths(), vec![FieldPath::from("tags")]);
    }
}
