//! Rule declarations
//!
//! A [`Rule`] pairs one or more field paths with a [`RuleKind`] and an
//! optional message override. The set of kinds is closed; user logic enters
//! through [`RuleKind::Predicate`].

use bson::{Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Value categories recognised by type-check rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Numeric,
    String,
    Boolean,
    Array,
    Date,
    /// ObjectId or a `{$ref, $id}` document reference
    Reference,
    Document,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Numeric => "numeric",
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Date => "date",
            ValueType::Reference => "reference",
            ValueType::Document => "document",
        }
    }

    /// Whether `value` belongs to this category
    pub fn matches(&self, value: &Bson) -> bool {
        match self {
            ValueType::Numeric => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)),
            ValueType::String => matches!(value, Bson::String(_)),
            ValueType::Boolean => matches!(value, Bson::Boolean(_)),
            ValueType::Array => matches!(value, Bson::Array(_)),
            ValueType::Date => matches!(value, Bson::DateTime(_) | Bson::Timestamp(_)),
            ValueType::Reference => match value {
                Bson::ObjectId(_) | Bson::DbPointer(_) => true,
                Bson::Document(d) => d.contains_key("$ref") && d.contains_key("$id"),
                _ => false,
            },
            ValueType::Document => matches!(value, Bson::Document(_)),
        }
    }
}

/// Named string formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Email,
    Url,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Email => "email",
            Format::Url => "url",
        }
    }
}

/// User-supplied check over a field value and the whole document snapshot
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<dyn Fn(&Bson, &BsonDocument) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Bson, &BsonDocument) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, value: &Bson, document: &BsonDocument) -> bool {
        (self.check)(value, document)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

/// The closed set of rule kinds
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Field must be present and not null
    Required,
    Type(ValueType),
    /// String value must match the pattern
    Regexp(Regex),
    /// Inclusive numeric bounds
    Range { min: Option<f64>, max: Option<f64> },
    /// Value must equal one of the listed values
    Membership(Vec<Bson>),
    /// Inclusive bounds on string length (chars) or array length
    Length { min: Option<usize>, max: Option<usize> },
    /// Value must equal the value at another path of the same document
    Equals { other: String },
    Format(Format),
    Predicate(Predicate),
}

impl RuleKind {
    /// Short name used in violation payloads
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::Type(_) => "type",
            RuleKind::Regexp(_) => "regexp",
            RuleKind::Range { .. } => "range",
            RuleKind::Membership(_) => "membership",
            RuleKind::Length { .. } => "length",
            RuleKind::Equals { .. } => "equals",
            RuleKind::Format(_) => "format",
            RuleKind::Predicate(_) => "predicate",
        }
    }
}

/// A rule applied to one or more field paths
#[derive(Debug, Clone)]
pub struct Rule {
    pub fields: Vec<String>,
    pub kind: RuleKind,
    pub message: Option<String>,
}

impl Rule {
    pub fn new<I, S>(fields: I, kind: RuleKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            kind,
            message: None,
        }
    }

    pub fn required<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(fields, RuleKind::Required)
    }

    pub fn type_of<I: IntoIterator<Item = S>, S: Into<String>>(fields: I, ty: ValueType) -> Self {
        Self::new(fields, RuleKind::Type(ty))
    }

    /// Fails with `InvalidArgument` when the pattern does not compile
    pub fn regexp<I: IntoIterator<Item = S>, S: Into<String>>(
        fields: I,
        pattern: &str,
    ) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            MnemosyneError::InvalidArgument(format!("invalid pattern '{}': {}", pattern, e))
        })?;
        Ok(Self::new(fields, RuleKind::Regexp(re)))
    }

    pub fn range<I: IntoIterator<Item = S>, S: Into<String>>(
        fields: I,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        Self::new(fields, RuleKind::Range { min, max })
    }

    pub fn membership<I, S, V>(fields: I, allowed: V) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        V: IntoIterator,
        V::Item: Into<Bson>,
    {
        Self::new(
            fields,
            RuleKind::Membership(allowed.into_iter().map(Into::into).collect()),
        )
    }

    pub fn length<I: IntoIterator<Item = S>, S: Into<String>>(
        fields: I,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Self {
        Self::new(fields, RuleKind::Length { min, max })
    }

    pub fn equals<I: IntoIterator<Item = S>, S: Into<String>>(fields: I, other: &str) -> Self {
        Self::new(
            fields,
            RuleKind::Equals {
                other: other.to_string(),
            },
        )
    }

    pub fn email<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(fields, RuleKind::Format(Format::Email))
    }

    pub fn url<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(fields, RuleKind::Format(Format::Url))
    }

    pub fn predicate<I, S, F>(fields: I, name: &str, check: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Bson, &BsonDocument) -> bool + Send + Sync + 'static,
    {
        Self::new(fields, RuleKind::Predicate(Predicate::new(name, check)))
    }

    /// Replace the default violation message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_reference_type() {
        assert!(ValueType::Reference.matches(&Bson::ObjectId(ObjectId::new())));
        assert!(ValueType::Reference.matches(&Bson::Document(
            doc! { "$ref": "users", "$id": ObjectId::new() }
        )));
        assert!(!ValueType::Reference.matches(&Bson::Document(doc! { "id": 1 })));
    }

    #[test]
    fn test_numeric_type() {
        assert!(ValueType::Numeric.matches(&Bson::Int64(1)));
        assert!(ValueType::Numeric.matches(&Bson::Double(1.5)));
        assert!(!ValueType::Numeric.matches(&Bson::String("1".into())));
    }

    #[test]
    fn test_bad_pattern_is_invalid_argument() {
        let err = Rule::regexp(["code"], "(").unwrap_err();
        assert!(matches!(err, MnemosyneError::InvalidArgument(_)));
    }

    #[test]
    fn test_rule_names() {
        assert_eq!(Rule::required(["a"]).kind.name(), "required");
        assert_eq!(Rule::email(["a"]).kind.name(), "format");
        assert_eq!(
            Rule::predicate(["a"], "even", |_, _| true).kind.name(),
            "predicate"
        );
    }
}
