//! Field-level write policies.

use super::condition::Condition;
use super::modification::Modification;
use super::value::FieldPath;
use crate::eval::evaluate;
use serde::{Deserialize, Serialize};

/// One write rule on a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldRestriction {
    /// Field the rule guards.
    pub path: FieldPath,
    /// Condition the stored record must satisfy for the write to go through.
    pub limited_if: Condition,
    /// Condition every value assigned to the field must satisfy.
    pub value_must: Condition,
}

/// A set of field rules, evaluated against incoming modifications.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRestrictions {
    pub rules: Vec<FieldRestriction>,
}

impl UpdateRestrictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, path: impl Into<FieldPath>, limited_if: Condition, value_must: Condition) -> Self {
        self.rules.push(FieldRestriction {
            path: path.into(),
            limited_if,
            value_must,
        });
        self
    }

    /// The field may never change.
    pub fn cannot_be_modified(self, path: impl Into<FieldPath>) -> Self {
        self.rule(path, Condition::Never, Condition::Always)
    }

    /// The field may only change on records matching `condition`.
    pub fn require_for_change(self, path: impl Into<FieldPath>, condition: Condition) -> Self {
        self.rule(path, condition, Condition::Always)
    }

    /// Values written to the field must match `condition`.
    pub fn must_be(self, path: impl Into<FieldPath>, condition: Condition) -> Self {
        self.rule(path, Condition::Always, condition)
    }

    /// The condition a write of `modification` must satisfy.
    ///
    /// Returns `Never` as soon as a hard rule is violated.
    pub fn evaluate(&self, modification: &Modification) -> Condition {
        let mut required = Vec::new();
        for rule in &self.rules {
            if !modification.touches(&rule.path) {
                continue;
            }
            if rule.limited_if == Condition::Never {
                return Condition::Never;
            }
            if rule.value_must != Condition::Always {
                let vetted = modification
                    .for_field(&rule.path)
                    .map(|m| vet_values(&m, &rule.value_must))
                    .unwrap_or(false);
                if !vetted {
                    return Condition::Never;
                }
            }
            required.push(rule.limited_if.clone());
        }
        Condition::and(required)
    }
}

/// Whether every value `modification` can write is known to satisfy
/// `condition`. Operations whose result depends on stored data fail.
fn vet_values(modification: &Modification, condition: &Condition) -> bool {
    match modification {
        Modification::Assign(value) => evaluate(condition, value),
        Modification::Chain(steps) => steps.iter().all(|s| vet_values(s, condition)),
        Modification::IfNotNull(inner) => vet_values(inner, condition),
        _ => false,
    }
}
