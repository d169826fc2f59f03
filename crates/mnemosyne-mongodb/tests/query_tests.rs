//! Filter and update builders evaluated by the in-process store

mod common;

use bson::{doc, Bson};
use common::memory_collection;
use mnemosyne_mongodb::{Collection, Expression, Operator, UpdateOptions};

async fn seed(collection: &Collection) {
    let people = vec![
        doc! { "_id": 1, "name": "Alice", "age": 31, "tags": ["admin", "ops"], "scores": [{ "k": "a", "v": 9 }] },
        doc! { "_id": 2, "name": "bob", "age": 17, "tags": ["ops"], "scores": [{ "k": "a", "v": 3 }] },
        doc! { "_id": 3, "name": "Carol", "age": 45, "tags": [], "email": Bson::Null },
        doc! { "_id": 4, "name": "dave", "age": 28.5, "tags": ["dev", "ops"] },
    ];
    collection.insert_multiple(people).await.unwrap();
}

async fn ids(collection: &Collection, expression: &Expression) -> Vec<i32> {
    collection
        .find()
        .query(expression)
        .sort_by("_id", true)
        .to_documents()
        .await
        .unwrap()
        .iter()
        .map(|d| d.get_i32("_id").unwrap())
        .collect()
}

#[tokio::test]
async fn test_comparison_and_membership() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut adults = Expression::new();
    adults.where_greater_or_equal("age", 18).unwrap();
    assert_eq!(ids(&people, &adults).await, vec![1, 3, 4]);

    let mut range = Expression::new();
    range.where_greater("age", 20).unwrap();
    range.where_less("age", 40).unwrap();
    assert_eq!(ids(&people, &range).await, vec![1, 4]);

    let mut named = Expression::new();
    named.where_in("name", ["bob", "dave"]);
    assert_eq!(ids(&people, &named).await, vec![2, 4]);

    let mut not_named = Expression::new();
    not_named.where_not_in("name", ["bob", "dave"]);
    assert_eq!(ids(&people, &not_named).await, vec![1, 3]);
}

#[tokio::test]
async fn test_array_conditions() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut ops = Expression::new();
    ops.where_eq("tags", "ops");
    assert_eq!(ids(&people, &ops).await, vec![1, 2, 4]);

    let mut both = Expression::new();
    both.where_all("tags", ["dev", "ops"]);
    assert_eq!(ids(&people, &both).await, vec![4]);

    let mut empty = Expression::new();
    empty.where_array_size("tags", 0);
    assert_eq!(ids(&people, &empty).await, vec![3]);

    let mut high = Expression::new();
    high.where_elem_match_with("scores", |e| {
        e.where_eq("k", "a");
        e.where_greater("v", 5)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(ids(&people, &high).await, vec![1]);
}

#[tokio::test]
async fn test_existence_null_and_pattern() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut has_scores = Expression::new();
    has_scores.where_exists("scores");
    assert_eq!(ids(&people, &has_scores).await, vec![1, 2]);

    let mut no_email = Expression::new();
    no_email.where_null("email");
    assert_eq!(ids(&people, &no_email).await, vec![1, 2, 3, 4]);

    let mut starts_with_a = Expression::new();
    starts_with_a.where_like("name", "^a", true);
    assert_eq!(ids(&people, &starts_with_a).await, vec![1]);

    let mut even = Expression::new();
    even.where_mod("_id", 2, 0);
    assert_eq!(ids(&people, &even).await, vec![2, 4]);

    let mut doubles = Expression::new();
    doubles.where_type("age", "double");
    assert_eq!(ids(&people, &doubles).await, vec![4]);
}

#[tokio::test]
async fn test_mod_on_extreme_values() {
    let numbers = memory_collection("numbers");
    numbers
        .insert(bson::doc! { "_id": 1, "n": i64::MIN })
        .await
        .unwrap();

    let mut by_minus_one = Expression::new();
    by_minus_one.where_mod("n", -1, 0);
    assert_eq!(ids(&numbers, &by_minus_one).await, vec![1]);
}

#[tokio::test]
async fn test_logical_composition() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut either = Expression::new();
    either
        .where_or_with(|e| {
            e.where_less("age", 18)?;
            Ok(())
        })
        .unwrap()
        .where_or_with(|e| {
            e.where_greater("age", 40)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(ids(&people, &either).await, vec![2, 3]);

    let mut neither = Expression::new();
    let mut young = Expression::new();
    young.where_less("age", 18).unwrap();
    let mut ops = Expression::new();
    ops.where_eq("tags", "ops");
    neither.where_nor([young, ops]);
    assert_eq!(ids(&people, &neither).await, vec![3]);
}

#[tokio::test]
async fn test_array_update_operators() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut alice = Expression::new();
    alice.where_eq("_id", 1);

    let mut op = Operator::new();
    op.push_each("tags", ["qa", "sre"]).add_to_set("badges", "early");
    people
        .update(&alice, &op, UpdateOptions::default())
        .await
        .unwrap();
    let mut op = Operator::new();
    op.pull("tags", "ops");
    people
        .update(&alice, &op, UpdateOptions::default())
        .await
        .unwrap();

    let stored = people.find().query(&alice).to_documents().await.unwrap();
    assert_eq!(
        stored[0].get_array("tags").unwrap(),
        &vec![Bson::from("admin"), Bson::from("qa"), Bson::from("sre")]
    );
    assert_eq!(stored[0].get_array("badges").unwrap(), &vec![Bson::from("early")]);

    let mut op = Operator::new();
    op.pop_first("tags").rename("name", "display_name").unset("scores");
    people
        .update(&alice, &op, UpdateOptions::default())
        .await
        .unwrap();

    let stored = people.find().query(&alice).to_documents().await.unwrap();
    assert_eq!(stored[0].get_str("display_name").unwrap(), "Alice");
    assert!(!stored[0].contains_key("scores"));
    assert_eq!(stored[0].get_array("tags").unwrap().len(), 2);
}

#[tokio::test]
async fn test_numeric_update_operators() {
    let people = memory_collection("people");
    seed(&people).await;

    let mut everyone = Operator::new();
    everyone.inc("visits", 1).unwrap().max("age", 30);
    people.update_all(&everyone).await.unwrap();

    let rows = people.find().sort_by("_id", true).to_documents().await.unwrap();
    let ages: Vec<f64> = rows
        .iter()
        .map(|d| match d.get("age") {
            Some(Bson::Int32(n)) => *n as f64,
            Some(Bson::Double(n)) => *n,
            other => panic!("unexpected age {:?}", other),
        })
        .collect();
    assert_eq!(ages, vec![31.0, 30.0, 45.0, 30.0]);
    assert!(rows.iter().all(|d| d.get_i32("visits").ok() == Some(1)));
}
