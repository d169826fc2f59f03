//! Rule set behaviour over realistic documents

use bson::{doc, oid::ObjectId, Bson};
use mnemosyne_validation::{Rule, RuleSet, ValueType};

fn account_rules() -> RuleSet {
    RuleSet::builder()
        .rule(Rule::required(["login", "email", "password"]))
        .rule(Rule::type_of(["age"], ValueType::Numeric))
        .rule(Rule::range(["age"], Some(18.0), Some(130.0)))
        .rule(Rule::email(["email"]))
        .rule(Rule::length(["login"], Some(3), Some(16)))
        .rule(Rule::equals(["password_confirm"], "password"))
        .rule(Rule::membership(["role"], vec!["admin", "user"]))
        .rule(Rule::regexp(["zip"], r"^\d{5}$").unwrap())
        .rule(Rule::type_of(["owner"], ValueType::Reference))
        .rule(Rule::predicate(["score"], "even", |v, _| {
            v.as_i32().is_some_and(|n| n % 2 == 0)
        }))
        .build()
}

fn valid_account() -> bson::Document {
    doc! {
        "login": "alice",
        "email": "alice@example.com",
        "password": "s3cret",
        "password_confirm": "s3cret",
        "age": 31,
        "role": "admin",
        "zip": "12345",
        "owner": ObjectId::new(),
        "score": 4,
    }
}

// ============================================================================
// Valid documents
// ============================================================================

#[test]
fn test_valid_document_has_no_violations() {
    assert!(account_rules().validate(&valid_account()).is_empty());
}

#[test]
fn test_minimal_document_only_needs_required_fields() {
    let d = doc! { "login": "bob", "email": "bob@example.com", "password": "x" };
    assert!(account_rules().validate(&d).is_empty());
}

// ============================================================================
// Required fields
// ============================================================================

#[test]
fn test_removing_required_field_reports_exactly_that_field() {
    let mut d = valid_account();
    d.remove("email");

    let violations = account_rules().validate(&d);
    assert_eq!(violations.len(), 1);
    let v = &violations.as_slice()[0];
    assert_eq!(v.field, "email");
    assert_eq!(v.rule, "required");
}

#[test]
fn test_null_counts_as_missing() {
    let mut d = valid_account();
    d.insert("login", Bson::Null);

    let violations = account_rules().validate(&d);
    assert_eq!(violations.fields(), vec!["login"]);
}

// ============================================================================
// Collecting every violation
// ============================================================================

#[test]
fn test_all_rules_run() {
    let d = doc! {
        "login": "al",
        "email": "not-an-email",
        "password": "a",
        "password_confirm": "b",
        "age": 12,
        "role": "root",
        "zip": "12",
        "owner": "someone",
        "score": 3,
    };

    let violations = account_rules().validate(&d);
    let rules: Vec<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
    assert_eq!(
        rules,
        vec![
            "range",
            "format",
            "length",
            "equals",
            "membership",
            "regexp",
            "type",
            "predicate"
        ]
    );
}

#[test]
fn test_range_and_length_report_bounds() {
    let mut d = valid_account();
    d.insert("age", 200);
    d.insert("login", "a-very-long-login-name");

    let violations = account_rules().validate(&d);
    let age = violations.for_field("age").next().unwrap();
    assert_eq!(age.params.get_f64("actual").unwrap(), 200.0);
    assert_eq!(age.params.get_f64("max").unwrap(), 130.0);

    let login = violations.for_field("login").next().unwrap();
    assert_eq!(login.params.get_i64("actual").unwrap(), 22);
    assert_eq!(login.params.get_i64("max").unwrap(), 16);
}

#[test]
fn test_type_failure_does_not_hide_range_failure() {
    let mut d = valid_account();
    d.insert("age", "old");

    let violations = account_rules().validate(&d);
    let age: Vec<&str> = violations.for_field("age").map(|v| v.rule.as_str()).collect();
    assert_eq!(age, vec!["type", "range"]);
}

// ============================================================================
// Cross-field and predicate rules
// ============================================================================

#[test]
fn test_equals_reads_sibling_snapshot() {
    let rules = RuleSet::new(vec![Rule::equals(["a.copy"], "a.orig")]);
    assert!(rules
        .validate(&doc! { "a": { "orig": 1, "copy": 1 } })
        .is_empty());
    assert_eq!(
        rules.validate(&doc! { "a": { "orig": 1, "copy": 2 } }).len(),
        1
    );
}

#[test]
fn test_predicate_sees_whole_document() {
    let rules = RuleSet::new(vec![Rule::predicate(["end"], "after_start", |end, d| {
        match (end.as_i32(), d.get_i32("start").ok()) {
            (Some(e), Some(s)) => e > s,
            _ => false,
        }
    })]);

    assert!(rules.validate(&doc! { "start": 1, "end": 2 }).is_empty());
    let violations = rules.validate(&doc! { "start": 5, "end": 2 });
    assert_eq!(violations.as_slice()[0].message, "failed check 'after_start'");
}

#[test]
fn test_violations_serialize_to_json() {
    let violations = account_rules().validate(&doc! {});
    let json = serde_json::to_value(&violations).unwrap();
    assert_eq!(json["violations"].as_array().unwrap().len(), 3);
}
