//! Collection contract tests against the in-memory backend.

mod common;

use common::Person;
use fieldstore::{
    Aggregate, CollectionConfig, Condition, DbError, FieldCollection, FieldPath, InMemoryFieldCollection,
    Modification, OrdValue, Query, SortPart, UniqueConstraint, UpdateRestrictions,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;

fn people() -> InMemoryFieldCollection<Person> {
    let collection = InMemoryFieldCollection::with_config(CollectionConfig {
        unique: vec![
            UniqueConstraint::Unique("email".into()),
            UniqueConstraint::UniqueSet(vec!["name".into(), "address.zip".into()]),
        ],
        ..Default::default()
    });
    collection
        .insert(vec![
            Person::new(1, "Ann", 31).in_city("Oslo", "0150").with_email("ann@x.io"),
            Person::new(2, "Bob", 25).in_city("Bergen", "5003").with_tags(&["admin"]),
            Person::new(3, "Cid", 47).in_city("Oslo", "0151"),
            Person::new(4, "Dee", 25).in_city("Tromsø", "9008").with_tags(&["admin", "ops"]),
        ])
        .unwrap();
    collection
}

fn ids(people: &[Person]) -> Vec<u32> {
    people.iter().map(|p| p.id).collect()
}

// --- Queries ---

#[test]
fn test_nested_field_conditions() {
    let collection = people();
    let in_oslo = Query::new(Condition::eq("address.city", "Oslo"));
    assert_eq!(ids(&collection.find(&in_oslo).unwrap().to_vec().unwrap()), vec![1, 3]);

    let nested = Condition::field("address", Condition::field("city", Condition::Equal(json!("Bergen"))));
    assert_eq!(collection.count(&nested).unwrap(), 1);
}

#[test]
fn test_list_conditions() {
    let collection = people();
    let admins = Condition::field("tags", Condition::ListAnyElements(Box::new(Condition::Equal(json!("admin")))));
    assert_eq!(collection.count(&admins).unwrap(), 2);

    let untagged = Condition::field("tags", Condition::ListSizeEquals(0));
    assert_eq!(collection.count(&untagged).unwrap(), 2);
}

#[test]
fn test_text_search_over_record() {
    let collection = people();
    let search = Condition::TextSearch {
        loose: vec!["osl".to_string()],
        exact: vec![],
        reject: vec!["cid".to_string()],
    };
    assert_eq!(ids(&collection.find(&Query::new(search)).unwrap().to_vec().unwrap()), vec![1]);
}

#[test]
fn test_sort_skip_limit() {
    let collection = people();
    let query = Query::default()
        .order_by(SortPart::descending("age"))
        .skip(1)
        .limit(2);
    assert_eq!(ids(&collection.find(&query).unwrap().to_vec().unwrap()), vec![1, 2]);

    let by_city = Query::default().order_by(SortPart::ascending("address.city"));
    assert_eq!(ids(&collection.find(&by_city).unwrap().to_vec().unwrap()), vec![2, 1, 3, 4]);
}

#[test]
fn test_get_many() {
    let collection = people();
    let found = collection.get_many(&[4, 2, 99]).unwrap();
    assert_eq!(ids(&found), vec![2, 4]);
}

// --- Uniqueness ---

#[test]
fn test_composite_uniqueness() {
    let collection = people();
    let clash = collection.insert_one(Person::new(5, "Ann", 20).in_city("Oslo", "0150"));
    match clash {
        Err(DbError::Conflict { fields }) => assert_eq!(fields, vec!["name", "address.zip"]),
        other => panic!("expected conflict, got {:?}", other),
    }

    // Same name in another zip is fine.
    collection.insert_one(Person::new(5, "Ann", 20).in_city("Oslo", "0152")).unwrap();
}

// --- Updates ---

#[test]
fn test_chain_applies_in_order() {
    let collection = people();
    let modification = Modification::chain([
        Modification::increment("age", 1),
        Modification::field("age", Modification::Multiply(json!(2))),
        Modification::field("tags", Modification::AppendSet(vec![json!("admin"), json!("new")])),
    ]);
    let change = collection.update_one_by_id(&2, &modification).unwrap();
    let bob = change.new.unwrap();
    assert_eq!(bob.age, 52);
    assert_eq!(bob.tags, vec!["admin", "new"]);
}

#[test]
fn test_concurrent_increments_are_not_lost() {
    let collection = Arc::new(people());
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let collection = Arc::clone(&collection);
            thread::spawn(move || {
                for _ in 0..50 {
                    collection.update_one_by_id(&1, &Modification::increment("score", 1.5)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(collection.get(&1).unwrap().unwrap().score, 600.0);
}

#[test]
fn test_update_restrictions_guard_writes() {
    let collection = people();
    let restrictions = UpdateRestrictions::new()
        .cannot_be_modified("email")
        .require_for_change("age", Condition::eq("name", "Bob"));

    let email_change = Modification::assign("email", "new@x.io");
    assert_eq!(restrictions.evaluate(&email_change), Condition::Never);

    let age_change = Modification::increment("age", 1);
    let guard = restrictions.evaluate(&age_change);
    let condition = Condition::field("_id", Condition::Inside(vec![json!(1), json!(2)])).and_with(guard);
    assert_eq!(collection.update_many(&condition, &age_change).unwrap(), 1);
    assert_eq!(collection.get(&2).unwrap().unwrap().age, 26);
    assert_eq!(collection.get(&1).unwrap().unwrap().age, 31);

    assert_eq!(restrictions.evaluate(&Modification::assign("name", "X")), Condition::Always);
}

// --- Aggregates ---

#[test]
fn test_grouped_aggregates_match_manual_computation() {
    let collection = people();
    let age = FieldPath::from("age");
    let city = FieldPath::from("address.city");

    let averages = collection.group_aggregate(&Condition::Always, &city, &age, Aggregate::Average).unwrap();
    assert_eq!(averages.get(&OrdValue(json!("Oslo"))), Some(&Some(39.0)));
    assert_eq!(averages.get(&OrdValue(json!("Bergen"))), Some(&Some(25.0)));

    let max = collection.aggregate(&Condition::Always, &age, Aggregate::Max).unwrap();
    assert_eq!(max, Some(47.0));
    let min = collection.aggregate(&Condition::eq("address.city", "Oslo"), &age, Aggregate::Min).unwrap();
    assert_eq!(min, Some(31.0));

    let nobody = Condition::eq("name", "Zed");
    assert_eq!(collection.aggregate(&nobody, &age, Aggregate::Average).unwrap(), None);
    assert_eq!(collection.aggregate(&nobody, &age, Aggregate::Count).unwrap(), Some(0.0));

    let counts = collection.group_count(&Condition::Always, &age).unwrap();
    assert_eq!(counts.get(&OrdValue(json!(25))), Some(&2));
}

#[test]
fn test_standard_deviation() {
    let collection = people();
    let age = FieldPath::from("age");
    let population = collection
        .aggregate(&Condition::eq("age", 25), &age, Aggregate::StandardDeviationPopulation)
        .unwrap();
    assert_eq!(population, Some(0.0));

    let single = collection
        .aggregate(&Condition::eq("name", "Ann"), &age, Aggregate::StandardDeviationSample)
        .unwrap();
    assert_eq!(single, None);
}
