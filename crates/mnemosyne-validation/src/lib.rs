//! mnemosyne-validation: declarative document rules
//!
//! A [`RuleSet`] is declared once per document variant, is immutable after
//! construction, and is evaluated against a snapshot of a document's fields.
//! Evaluation never mutates the document and never stops at the first
//! failure: every rule runs and every violation is collected.
//!
//! ```
//! use bson::doc;
//! use mnemosyne_validation::{Rule, RuleSet, ValueType};
//!
//! let rules = RuleSet::builder()
//!     .rule(Rule::required(["name"]))
//!     .rule(Rule::type_of(["age"], ValueType::Numeric))
//!     .rule(Rule::range(["age"], Some(0.0), None))
//!     .build();
//!
//! assert!(rules.validate(&doc! { "name": "x", "age": 3 }).is_empty());
//! assert_eq!(rules.validate(&doc! { "age": -1 }).len(), 2);
//! ```

pub mod engine;
pub mod formats;
pub mod rules;

pub use engine::{RuleSet, RuleSetBuilder};
pub use mnemosyne_common::{Violation, Violations};
pub use rules::{Format, Predicate, Rule, RuleKind, ValueType};
