//! Per-type registry of addressable field paths.

use super::condition::Condition;
use super::modification::Modification;
use super::query::Query;
use super::value::{get_path, set_path, FieldPath};
use crate::error::{DbError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Accessor for one addressable field.
#[derive(Clone, Debug)]
pub struct FieldAccessor {
    path: FieldPath,
}

impl FieldAccessor {
    pub fn name(&self) -> &str {
        self.path.as_str()
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Read the field from a document.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        get_path(doc, &self.path)
    }

    /// Return a document with the field replaced.
    pub fn with_value(&self, doc: Value, value: Value) -> Result<Value> {
        set_path(doc, &self.path, value)
    }
}

/// The field registry of a record type.
///
/// Built once per type and handed to every component that resolves paths.
/// Expressions are validated against it before any evaluation, so a path
/// that does not exist surfaces as [`DbError::UnknownField`] up front.
#[derive(Clone, Debug)]
pub struct Schema {
    id_field: FieldPath,
    fields: BTreeMap<FieldPath, FieldAccessor>,
    open: bool,
}

impl Schema {
    pub fn builder(id_field: impl Into<FieldPath>) -> SchemaBuilder {
        let id_field = id_field.into();
        let mut builder = SchemaBuilder {
            id_field: id_field.clone(),
            fields: BTreeMap::new(),
        };
        builder.register(id_field);
        builder
    }

    /// A schema that accepts every path, for schemaless documents.
    pub fn open(id_field: impl Into<FieldPath>) -> Schema {
        let mut schema = Schema::builder(id_field).build();
        schema.open = true;
        schema
    }

    pub fn id_field(&self) -> &FieldPath {
        &self.id_field
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldAccessor> {
        self.fields.values()
    }

    /// Look up the accessor for a path.
    pub fn field(&self, path: &FieldPath) -> Result<FieldAccessor> {
        if let Some(accessor) = self.fields.get(path) {
            return Ok(accessor.clone());
        }
        if self.open {
            return Ok(FieldAccessor { path: path.clone() });
        }
        Err(DbError::UnknownField(path.to_string()))
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.open || path.is_root() || self.fields.contains_key(path)
    }

    fn check_paths(&self, paths: Vec<FieldPath>) -> Result<()> {
        match paths.into_iter().find(|p| !self.contains(p)) {
            Some(unknown) => Err(DbError::UnknownField(unknown.to_string())),
            None => Ok(()),
        }
    }

    pub fn validate_condition(&self, condition: &Condition) -> Result<()> {
        self.check_paths(condition.paths())
    }

    pub fn validate_modification(&self, modification: &Modification) -> Result<()> {
        self.check_paths(modification.paths())
    }

    pub fn validate_query(&self, query: &Query) -> Result<()> {
        self.validate_condition(&query.condition)?;
        self.check_paths(query.order_by.iter().map(|s| s.field.clone()).collect())
    }
}

pub struct SchemaBuilder {
    id_field: FieldPath,
    fields: BTreeMap<FieldPath, FieldAccessor>,
}

impl SchemaBuilder {
    fn register(&mut self, path: FieldPath) {
        for ancestor in path.ancestors() {
            self.fields
                .entry(ancestor.clone())
                .or_insert(FieldAccessor { path: ancestor });
        }
        self.fields
            .entry(path.clone())
            .or_insert(FieldAccessor { path });
    }

    /// Register a field. Nested paths register their ancestors too.
    pub fn field(mut self, path: impl Into<FieldPath>) -> Self {
        self.register(path.into());
        self
    }

    pub fn build(self) -> Schema {
        Schema {
            id_field: self.id_field,
            fields: self.fields,
            open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder("_id").field("name").field("address.city").build()
    }

    #[test]
    fn test_nested_field_registers_ancestors() {
        let schema = schema();
        assert!(schema.contains(&"address".into()));
        assert!(schema.contains(&"address.city".into()));
        assert!(schema.contains(&"_id".into()));
        assert!(!schema.contains(&"email".into()));
    }

    #[test]
    fn test_unknown_path_rejected_before_evaluation() {
        let schema = schema();
        let condition = Condition::eq("email", "x");
        assert!(matches!(
            schema.validate_condition(&condition),
            Err(DbError::UnknownField(p)) if p == "email"
        ));
        assert!(schema.validate_condition(&Condition::eq("name", "x")).is_ok());
    }

    #[test]
    fn test_accessor_get_and_with_value() {
        let schema = schema();
        let city = schema.field(&"address.city".into()).unwrap();
        let doc = json!({"_id": "1", "address": {"city": "Oslo"}});
        assert_eq!(city.get(&doc), Some(&json!("Oslo")));
        let doc = city.with_value(doc, json!("Bergen")).unwrap();
        assert_eq!(doc["address"]["city"], "Bergen");
    }

    #[test]
    fn test_open_schema_accepts_anything() {
        let schema = Schema::open("_id");
        assert!(schema.validate_condition(&Condition::eq("whatever.deep", 1)).is_ok());
    }
}
