//! Record types shared by the integration tests.

#![allow(dead_code)]

use fieldstore::{Model, Schema};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub zip: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id")]
    pub id: u32,
    pub name: String,
    pub age: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub score: f64,
}

impl Person {
    pub fn new(id: u32, name: &str, age: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
            email: None,
            address: Address::default(),
            tags: Vec::new(),
            score: 0.0,
        }
    }

    pub fn in_city(mut self, city: &str, zip: &str) -> Self {
        self.address = Address {
            city: city.to_string(),
            zip: zip.to_string(),
        };
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Model for Person {
    type Id = u32;

    fn id(&self) -> &u32 {
        &self.id
    }

    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::builder("_id")
                .field("name")
                .field("age")
                .field("email")
                .field("address.city")
                .field("address.zip")
                .field("tags")
                .field("score")
                .build()
        })
    }
}

/// Route test logs through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
