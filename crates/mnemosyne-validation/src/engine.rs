//! Rule evaluation

use crate::formats::{validate_email, validate_url};
use crate::rules::{Format, Rule, RuleKind};
use bson::{Bson, Document as BsonDocument};
use mnemosyne_common::path::get_path;
use mnemosyne_common::{Violation, Violations};
use std::sync::Arc;

/// Immutable rule list for one document variant
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<Rule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    /// A rule set with no rules; every document is valid
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against a snapshot of the document fields.
    ///
    /// Each (rule, field) pair yields at most one violation; violations are
    /// reported in rule-declaration order.
    pub fn validate(&self, fields: &BsonDocument) -> Violations {
        let mut violations = Violations::new();
        for rule in self.rules.iter() {
            for field in &rule.fields {
                if let Some(mut violation) = check(rule, field, fields) {
                    if let Some(message) = &rule.message {
                        violation.message = message.clone();
                    }
                    violations.add(violation);
                }
            }
        }
        violations
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

/// Accumulates rules, then freezes them into a [`RuleSet`]
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> RuleSet {
        RuleSet::new(self.rules)
    }
}

fn check(rule: &Rule, field: &str, fields: &BsonDocument) -> Option<Violation> {
    let name = rule.kind.name();
    let value = match get_path(fields, field) {
        Some(Bson::Null) | None => {
            return match rule.kind {
                RuleKind::Required => Some(Violation::new(field, name, "Field required")),
                // absent values satisfy every other kind
                _ => None,
            };
        }
        Some(v) => v,
    };

    match &rule.kind {
        RuleKind::Required => None,

        RuleKind::Type(ty) => (!ty.matches(value)).then(|| {
            Violation::new(field, name, format!("must be of type {}", ty.name()))
                .with_param("expected", ty.name())
        }),

        RuleKind::Regexp(re) => {
            let matched = matches!(value, Bson::String(s) if re.is_match(s));
            (!matched).then(|| {
                Violation::new(field, name, "does not match pattern")
                    .with_param("pattern", re.as_str())
            })
        }

        RuleKind::Range { min, max } => {
            let Some(actual) = as_f64(value) else {
                return Some(Violation::new(field, name, "must be numeric"));
            };
            if let Some(min) = min.filter(|m| actual < *m) {
                return Some(
                    Violation::new(field, name, format!("must be at least {}", min))
                        .with_param("actual", actual)
                        .with_param("min", min),
                );
            }
            max.filter(|m| actual > *m).map(|max| {
                Violation::new(field, name, format!("must be at most {}", max))
                    .with_param("actual", actual)
                    .with_param("max", max)
            })
        }

        RuleKind::Membership(allowed) => {
            let found = allowed.iter().any(|a| values_equal(a, value));
            (!found).then(|| {
                Violation::new(field, name, "must be one of the allowed values")
                    .with_param("allowed", allowed.clone())
            })
        }

        RuleKind::Length { min, max } => {
            let actual = match value {
                Bson::String(s) => s.chars().count(),
                Bson::Array(items) => items.len(),
                _ => return Some(Violation::new(field, name, "must be a string or array")),
            };
            if let Some(min) = min.filter(|m| actual < *m) {
                return Some(
                    Violation::new(field, name, format!("length must be at least {}", min))
                        .with_param("actual", actual as i64)
                        .with_param("min", min as i64),
                );
            }
            max.filter(|m| actual > *m).map(|max| {
                Violation::new(field, name, format!("length must be at most {}", max))
                    .with_param("actual", actual as i64)
                    .with_param("max", max as i64)
            })
        }

        RuleKind::Equals { other } => {
            let same = get_path(fields, other).is_some_and(|o| values_equal(o, value));
            (!same).then(|| {
                Violation::new(field, name, format!("must be equal to '{}'", other))
                    .with_param("other", other.as_str())
            })
        }

        RuleKind::Format(format) => {
            let ok = match (format, value) {
                (Format::Email, Bson::String(s)) => validate_email(s),
                (Format::Url, Bson::String(s)) => validate_url(s),
                _ => false,
            };
            (!ok).then(|| {
                Violation::new(field, name, format!("must be a valid {}", format.name()))
                    .with_param("format", format.name())
            })
        }

        RuleKind::Predicate(predicate) => (!predicate.call(value, fields)).then(|| {
            Violation::new(field, name, format!("failed check '{}'", predicate.name()))
                .with_param("predicate", predicate.name())
        }),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// BSON equality where numbers compare by value across Int32/Int64/Double
fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
