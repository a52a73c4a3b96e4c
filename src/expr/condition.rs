//! Serializable predicate trees.

use super::value::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over a document.
///
/// Comparison variants apply to the value currently in focus; `OnField`
/// moves the focus to a nested field. Trees are finite and carry no
/// references, so they round-trip through JSON unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Always,
    Never,
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Equal(Value),
    NotEqual(Value),
    Inside(Vec<Value>),
    NotInside(Vec<Value>),
    GreaterThan(Value),
    LessThan(Value),
    GreaterOrEqual(Value),
    LessOrEqual(Value),
    OnField {
        path: FieldPath,
        condition: Box<Condition>,
    },
    /// Token-wise fuzzy search over every string in the focused value.
    TextSearch {
        #[serde(default)]
        loose: Vec<String>,
        #[serde(default)]
        exact: Vec<String>,
        #[serde(default)]
        reject: Vec<String>,
    },
    /// Value is present and not null.
    Exists,
    /// False on null, otherwise the inner condition.
    IfNotNull(Box<Condition>),
    StringContains {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    ListAllElements(Box<Condition>),
    ListAnyElements(Box<Condition>),
    ListSizeEquals(usize),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Always
    }
}

impl Condition {
    /// Apply `condition` to the field at `path`.
    pub fn field(path: impl Into<FieldPath>, condition: Condition) -> Condition {
        Condition::OnField {
            path: path.into(),
            condition: Box::new(condition),
        }
    }

    /// Conjunction with trivial members folded away.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Condition {
        let mut parts = Vec::new();
        for condition in conditions {
            match condition {
                Condition::Always => {}
                Condition::Never => return Condition::Never,
                Condition::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Condition::Always,
            1 => parts.pop().unwrap_or(Condition::Always),
            _ => Condition::And(parts),
        }
    }

    /// Disjunction with trivial members folded away.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Condition {
        let mut parts = Vec::new();
        for condition in conditions {
            match condition {
                Condition::Never => {}
                Condition::Always => return Condition::Always,
                Condition::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Condition::Never,
            1 => parts.pop().unwrap_or(Condition::Never),
            _ => Condition::Or(parts),
        }
    }

    pub fn negate(self) -> Condition {
        match self {
            Condition::Always => Condition::Never,
            Condition::Never => Condition::Always,
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }

    pub fn and_with(self, other: Condition) -> Condition {
        Condition::and([self, other])
    }

    /// `path == value`
    pub fn eq(path: impl Into<FieldPath>, value: impl Into<Value>) -> Condition {
        Condition::field(path, Condition::Equal(value.into()))
    }

    /// Every absolute field path this condition reads.
    pub fn paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.collect_paths(&FieldPath::root(), &mut out);
        out
    }

    pub(crate) fn collect_paths(&self, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
        match self {
            Condition::And(parts) | Condition::Or(parts) => {
                for part in parts {
                    part.collect_paths(prefix, out);
                }
            }
            Condition::Not(inner)
            | Condition::IfNotNull(inner)
            | Condition::ListAllElements(inner)
            | Condition::ListAnyElements(inner) => inner.collect_paths(prefix, out),
            Condition::OnField { path, condition } => {
                let full = prefix.join(path);
                out.push(full.clone());
                condition.collect_paths(&full, out);
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
    fn test_and_folds_trivial_members() {
        assert_eq!(Condition::and([Condition::Always, Condition::Always]), Condition::Always);
        assert_eq!(
            Condition::and([Condition::eq("a", 1), Condition::Never]),
            Condition::Never
        );
        assert_eq!(
            Condition::and([Condition::Always, Condition::eq("a", 1)]),
            Condition::eq("a", 1)
        );
    }

    #[test]
    fn test_or_folds_trivial_members() {
        assert_eq!(Condition::or(Vec::new()), Condition::Never);
        assert_eq!(
            Condition::or([Condition::eq("a", 1), Condition::Always]),
            Condition::Always
        );
    }

    #[test]
    fn test_double_negation() {
        let c = Condition::eq("a", 1);
        assert_eq!(c.clone().negate().negate(), c);
    }

    #[test]
    fn test_paths_are_absolute() {
        let c = Condition::and([
            Condition::field("address", Condition::field("city", Condition::Equal(json!("Oslo")))),
            Condition::eq("name", "x"),
        ]);
        let paths: Vec<String> = c.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["address", "address.city", "name"]);
    }

    #[test]
    fn test_json_round_trip() {
        let c = Condition::or([
            Condition::field("age", Condition::GreaterOrEqual(json!(18))),
            Condition::field(
                "bio",
                Condition::TextSearch {
                    loose: vec!["rust".into()],
                    exact: vec![],
                    reject: vec!["java".into()],
                },
            ),
            Condition::field("tags", Condition::ListAnyElements(Box::new(Condition::Inside(vec![json!("a")])))),
        ]);
        let text = serde_json::to_string(&c).unwrap();
        let back: Condition = serde_json::from_str(&text).unwrap();
        assert_eq!(back, c);
    }
}
