//! Record types shared by unit tests.

use crate::expr::Schema;
use crate::types::Model;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub age: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl User {
    pub fn new(id: &str, name: &str, age: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            age,
            email: None,
            tags: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

impl Model for User {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("_id")
                .field("name")
                .field("age")
                .field("email")
                .field("tags")
                .build()
        })
    }
}
