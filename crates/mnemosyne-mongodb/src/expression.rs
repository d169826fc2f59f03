//! Filter expression builder
//!
//! An [`Expression`] accumulates predicates into a canonical filter document.
//! Comparison methods on the same path merge into one operator sub-document:
//!
//! ```
//! use bson::doc;
//! use mnemosyne_mongodb::Expression;
//!
//! let mut expr = Expression::new();
//! expr.where_greater("x", 1).unwrap().where_less("x", 5).unwrap();
//! assert_eq!(expr.to_document(), doc! { "x": { "$gt": 1, "$lt": 5 } });
//! ```

use bson::{doc, Bson, Document as BsonDocument, Regex};
use mnemosyne_common::{MnemosyneError, Result};

/// Filter builder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    filter: BsonDocument,
}

impl Expression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality. Replaces anything previously set on `path`.
    pub fn where_eq(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.filter.insert(path, value.into());
        self
    }

    pub fn where_not_equal(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.add_operator(path, "$ne", value.into())
    }

    pub fn where_greater(&mut self, path: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.add_comparison(path, "$gt", value.into())
    }

    pub fn where_greater_or_equal(
        &mut self,
        path: &str,
        value: impl Into<Bson>,
    ) -> Result<&mut Self> {
        self.add_comparison(path, "$gte", value.into())
    }

    pub fn where_less(&mut self, path: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.add_comparison(path, "$lt", value.into())
    }

    pub fn where_less_or_equal(&mut self, path: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.add_comparison(path, "$lte", value.into())
    }

    pub fn where_in<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.add_operator(path, "$in", to_array(values))
    }

    pub fn where_not_in<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.add_operator(path, "$nin", to_array(values))
    }

    /// Array field must contain every listed value
    pub fn where_all<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.add_operator(path, "$all", to_array(values))
    }

    pub fn where_exists(&mut self, path: &str) -> &mut Self {
        self.add_operator(path, "$exists", Bson::Boolean(true))
    }

    pub fn where_not_exists(&mut self, path: &str) -> &mut Self {
        self.add_operator(path, "$exists", Bson::Boolean(false))
    }

    pub fn where_null(&mut self, path: &str) -> &mut Self {
        self.where_eq(path, Bson::Null)
    }

    /// BSON type, by alias (`"string"`) or number
    pub fn where_type(&mut self, path: &str, bson_type: impl Into<Bson>) -> &mut Self {
        self.add_operator(path, "$type", bson_type.into())
    }

    /// Substring-style pattern match
    pub fn where_like(&mut self, path: &str, pattern: &str, case_insensitive: bool) -> &mut Self {
        let options = if case_insensitive { "i" } else { "" };
        self.where_regex(path, pattern, options)
    }

    pub fn where_regex(&mut self, path: &str, pattern: &str, options: &str) -> &mut Self {
        let regex = Regex {
            pattern: pattern.to_string(),
            options: sorted_options(options),
        };
        self.add_operator(path, "$regex", Bson::RegularExpression(regex))
    }

    /// At least one array element matches `criteria`
    pub fn where_elem_match(&mut self, path: &str, criteria: &Expression) -> &mut Self {
        self.add_operator(path, "$elemMatch", Bson::Document(criteria.to_document()))
    }

    pub fn where_elem_match_with<F>(&mut self, path: &str, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        let nested = Self::build_nested(build)?;
        Ok(self.where_elem_match(path, &nested))
    }

    pub fn where_array_size(&mut self, path: &str, size: usize) -> &mut Self {
        self.add_operator(path, "$size", Bson::Int64(size as i64))
    }

    pub fn where_mod(&mut self, path: &str, divisor: i64, remainder: i64) -> &mut Self {
        self.add_operator(
            path,
            "$mod",
            Bson::Array(vec![Bson::Int64(divisor), Bson::Int64(remainder)]),
        )
    }

    pub fn where_or<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.add_clauses("$or", expressions)
    }

    pub fn where_and<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.add_clauses("$and", expressions)
    }

    pub fn where_nor<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.add_clauses("$nor", expressions)
    }

    /// Build one `$or` alternative in a fresh nested builder.
    ///
    /// The callback runs to completion before this call returns.
    pub fn where_or_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        let nested = Self::build_nested(build)?;
        Ok(self.add_clauses("$or", [nested]))
    }

    pub fn where_and_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        let nested = Self::build_nested(build)?;
        Ok(self.add_clauses("$and", [nested]))
    }

    pub fn where_nor_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        let nested = Self::build_nested(build)?;
        Ok(self.add_clauses("$nor", [nested]))
    }

    /// Fold another expression into this one with the same merge rules
    pub fn merge(&mut self, other: &Expression) -> &mut Self {
        for (key, value) in other.filter.iter() {
            match value {
                Bson::Array(clauses) if is_combinator(key) => {
                    let clauses = clauses.clone();
                    match self.filter.get_mut(key) {
                        Some(Bson::Array(items)) => items.extend(clauses),
                        _ => {
                            self.filter.insert(key.clone(), Bson::Array(clauses));
                        }
                    }
                }
                Bson::Document(ops) if is_operator_document(ops) => {
                    for (op, operand) in ops.iter() {
                        self.add_operator(key, op, operand.clone());
                    }
                }
                _ => {
                    self.filter.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Rendered filter on `path`, if any
    pub fn get(&self, path: &str) -> Option<&Bson> {
        self.filter.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    /// Canonical filter document. Idempotent.
    pub fn to_document(&self) -> BsonDocument {
        self.filter.clone()
    }

    pub fn into_document(self) -> BsonDocument {
        self.filter
    }

    fn build_nested<F>(build: F) -> Result<Expression>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        let mut nested = Expression::new();
        build(&mut nested)?;
        Ok(nested)
    }

    fn add_comparison(&mut self, path: &str, op: &str, value: Bson) -> Result<&mut Self> {
        check_comparable(path, &value)?;
        Ok(self.add_operator(path, op, value))
    }

    fn add_operator(&mut self, path: &str, op: &str, value: Bson) -> &mut Self {
        match self.filter.get_mut(path) {
            Some(Bson::Document(ops)) if is_operator_document(ops) => {
                ops.insert(op, value);
            }
            Some(existing) => {
                // a literal becomes an explicit $eq next to the new operator
                let literal = std::mem::replace(existing, Bson::Null);
                let mut ops = doc! { "$eq": literal };
                ops.insert(op, value);
                *existing = Bson::Document(ops);
            }
            None => {
                self.filter.insert(path, doc! { op: value });
            }
        }
        self
    }

    fn add_clauses<I: IntoIterator<Item = Expression>>(
        &mut self,
        combinator: &str,
        expressions: I,
    ) -> &mut Self {
        let clauses = expressions
            .into_iter()
            .map(|e| Bson::Document(e.into_document()));
        match self.filter.get_mut(combinator) {
            Some(Bson::Array(items)) => items.extend(clauses),
            _ => {
                self.filter.insert(combinator, Bson::Array(clauses.collect()));
            }
        }
        self
    }
}

impl From<BsonDocument> for Expression {
    fn from(filter: BsonDocument) -> Self {
        Self { filter }
    }
}

impl From<Expression> for BsonDocument {
    fn from(expression: Expression) -> Self {
        expression.filter
    }
}

fn to_array<I, V>(values: I) -> Bson
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    Bson::Array(values.into_iter().map(Into::into).collect())
}

fn sorted_options(options: &str) -> String {
    let mut chars: Vec<char> = options.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

fn is_combinator(key: &str) -> bool {
    matches!(key, "$or" | "$and" | "$nor")
}

/// A non-empty document whose keys are all operators
pub(crate) fn is_operator_document(doc: &BsonDocument) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn check_comparable(path: &str, value: &Bson) -> Result<()> {
    match value {
        Bson::Double(_)
        | Bson::Int32(_)
        | Bson::Int64(_)
        | Bson::Decimal128(_)
        | Bson::String(_)
        | Bson::DateTime(_)
        | Bson::Timestamp(_)
        | Bson::ObjectId(_)
        | Bson::Boolean(_)
        | Bson::Binary(_) => Ok(()),
        other => Err(MnemosyneError::InvalidArgument(format!(
            "field '{}': {:?} value is not comparable",
            path,
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators_merge_on_same_path() {
        let mut a = Expression::new();
        a.where_greater("x", 1).unwrap().where_less("x", 5).unwrap();

        let mut b = Expression::new();
        b.where_less("x", 5).unwrap().where_greater("x", 1).unwrap();

        // bson::Document equality ignores key order
        assert_eq!(a.to_document(), doc! { "x": { "$gt": 1, "$lt": 5 } });
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_operator_replaces() {
        let mut e = Expression::new();
        e.where_greater("x", 1).unwrap().where_greater("x", 7).unwrap();
        assert_eq!(e.to_document(), doc! { "x": { "$gt": 7 } });
    }

    #[test]
    fn test_literal_then_operator() {
        let mut e = Expression::new();
        e.where_eq("x", 3).where_not_equal("x", 4);
        assert_eq!(e.to_document(), doc! { "x": { "$eq": 3, "$ne": 4 } });
    }

    #[test]
    fn test_where_eq_overrides_operators() {
        let mut e = Expression::new();
        e.where_exists("x").where_eq("x", 1);
        assert_eq!(e.to_document(), doc! { "x": 1 });
    }

    #[test]
    fn test_non_comparable_value_names_field() {
        let mut e = Expression::new();
        let err = e.where_greater("tags", vec![1, 2]).unwrap_err();
        match err {
            MnemosyneError::InvalidArgument(msg) => assert!(msg.contains("'tags'")),
            other => panic!("unexpected error: {other:?}"),
        }
        let err = e.where_less("meta", doc! { "a": 1 }).unwrap_err();
        assert!(matches!(err, MnemosyneError::InvalidArgument(_)));
        assert!(e.is_empty());
    }

    #[test]
    fn test_set_and_array_operators() {
        let mut e = Expression::new();
        e.where_in("status", ["new", "open"])
            .where_not_in("owner", [1, 2])
            .where_all("tags", ["a", "b"])
            .where_array_size("tags", 2)
            .where_mod("n", 3, 1);
        assert_eq!(
            e.to_document(),
            doc! {
                "status": { "$in": ["new", "open"] },
                "owner": { "$nin": [1, 2] },
                "tags": { "$all": ["a", "b"], "$size": 2i64 },
                "n": { "$mod": [3i64, 1i64] },
            }
        );
    }

    #[test]
    fn test_where_like() {
        let mut e = Expression::new();
        e.where_like("name", "^jo", true);
        assert_eq!(
            e.get("name"),
            Some(&Bson::Document(doc! {
                "$regex": Bson::RegularExpression(Regex {
                    pattern: "^jo".to_string(),
                    options: "i".to_string(),
                })
            }))
        );
    }

    #[test]
    fn test_or_list_and_callback_share_clause_array() {
        let mut first = Expression::new();
        first.where_eq("a", 1);

        let mut e = Expression::new();
        e.where_or([first])
            .where_or_with(|nested| {
                nested.where_greater("b", 2)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            e.to_document(),
            doc! { "$or": [{ "a": 1 }, { "b": { "$gt": 2 } }] }
        );
    }

    #[test]
    fn test_callback_error_leaves_builder_untouched() {
        let mut e = Expression::new();
        let result = e.where_and_with(|nested| {
            nested.where_greater("b", Bson::Null)?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(e.is_empty());
    }

    #[test]
    fn test_elem_match_with() {
        let mut e = Expression::new();
        e.where_elem_match_with("items", |item| {
            item.where_eq("sku", "x1").where_greater_or_equal("qty", 2)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            e.to_document(),
            doc! { "items": { "$elemMatch": { "sku": "x1", "qty": { "$gte": 2 } } } }
        );
    }

    #[test]
    fn test_render_is_idempotent_round_trip() {
        let mut e = Expression::new();
        e.where_greater("x", 1)
            .unwrap()
            .where_nor_with(|n| {
                n.where_eq("y", "z");
                Ok(())
            })
            .unwrap();

        let rendered = e.to_document();
        assert_eq!(Expression::from(rendered.clone()).to_document(), rendered);
        assert_eq!(e.to_document(), rendered);
    }

    #[test]
    fn test_merge() {
        let mut a = Expression::new();
        a.where_greater("x", 1).unwrap().where_or([Expression::from(doc! { "k": 1 })]);
        let mut b = Expression::new();
        b.where_less("x", 9).unwrap().where_or([Expression::from(doc! { "k": 2 })]);

        a.merge(&b);
        assert_eq!(
            a.to_document(),
            doc! { "x": { "$gt": 1, "$lt": 9 }, "$or": [{ "k": 1 }, { "k": 2 }] }
        );
    }
}
