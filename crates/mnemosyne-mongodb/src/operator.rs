//! Update operator builder
//!
//! Calls for the same operator accumulate into one sub-document. `set` and
//! `unset` exclude each other per field: the later call wins.

use crate::expression::Expression;
use bson::{doc, Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result};

const UPDATE_OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$inc",
    "$mul",
    "$min",
    "$max",
    "$rename",
    "$setOnInsert",
    "$currentDate",
    "$push",
    "$addToSet",
    "$pull",
    "$pullAll",
    "$pop",
];

/// Update document builder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Operator {
    clauses: Vec<(String, BsonDocument)>,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.remove_field("$unset", path);
        self.operand_mut("$set").insert(path, value.into());
        self
    }

    pub fn unset(&mut self, path: &str) -> &mut Self {
        self.remove_field("$set", path);
        self.operand_mut("$unset").insert(path, "");
        self
    }

    /// Repeated calls on one field add up
    pub fn inc(&mut self, path: &str, amount: impl Into<Bson>) -> Result<&mut Self> {
        let amount = numeric(path, "$inc", amount.into())?;
        let ops = self.operand_mut("$inc");
        let total = match ops.get(path) {
            Some(previous) => combine(previous, &amount, |a, b| a + b, |a, b| a.checked_add(b)),
            None => amount,
        };
        ops.insert(path, total);
        Ok(self)
    }

    /// Repeated calls on one field multiply
    pub fn mul(&mut self, path: &str, factor: impl Into<Bson>) -> Result<&mut Self> {
        let factor = numeric(path, "$mul", factor.into())?;
        let ops = self.operand_mut("$mul");
        let total = match ops.get(path) {
            Some(previous) => combine(previous, &factor, |a, b| a * b, |a, b| a.checked_mul(b)),
            None => factor,
        };
        ops.insert(path, total);
        Ok(self)
    }

    pub fn min(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.operand_mut("$min").insert(path, value.into());
        self
    }

    pub fn max(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.operand_mut("$max").insert(path, value.into());
        self
    }

    /// Append one value. A second push on the same field switches to `$each`.
    pub fn push(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.append("$push", path, vec![value.into()], false);
        self
    }

    /// Append an ordered sequence of values
    pub fn push_each<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.append("$push", path, values.into_iter().map(Into::into).collect(), true);
        self
    }

    pub fn add_to_set(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.append("$addToSet", path, vec![value.into()], false);
        self
    }

    pub fn add_to_set_each<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.append(
            "$addToSet",
            path,
            values.into_iter().map(Into::into).collect(),
            true,
        );
        self
    }

    /// Remove every element equal to `value`
    pub fn pull(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.operand_mut("$pull").insert(path, value.into());
        self
    }

    /// Remove every element matching `condition`
    pub fn pull_matching(&mut self, path: &str, condition: &Expression) -> &mut Self {
        self.operand_mut("$pull")
            .insert(path, Bson::Document(condition.to_document()));
        self
    }

    pub fn pull_all<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.operand_mut("$pullAll").insert(path, values);
        self
    }

    pub fn pop_first(&mut self, path: &str) -> &mut Self {
        self.operand_mut("$pop").insert(path, -1);
        self
    }

    pub fn pop_last(&mut self, path: &str) -> &mut Self {
        self.operand_mut("$pop").insert(path, 1);
        self
    }

    pub fn rename(&mut self, path: &str, new_name: &str) -> &mut Self {
        self.operand_mut("$rename").insert(path, new_name);
        self
    }

    /// Only applied when an upsert inserts
    pub fn set_on_insert(&mut self, path: &str, value: impl Into<Bson>) -> &mut Self {
        self.operand_mut("$setOnInsert").insert(path, value.into());
        self
    }

    pub fn current_date(&mut self, path: &str) -> &mut Self {
        self.operand_mut("$currentDate").insert(path, true);
        self
    }

    /// True if `path` is targeted by `operator` (e.g. `"$set"`)
    pub fn has(&self, operator: &str, path: &str) -> bool {
        self.clauses
            .iter()
            .any(|(op, fields)| op == operator && fields.contains_key(path))
    }

    /// True when no operator targets any path
    pub fn is_empty(&self) -> bool {
        self.clauses.iter().all(|(_, fields)| fields.is_empty())
    }

    /// Canonical update document. Idempotent.
    pub fn to_document(&self) -> BsonDocument {
        self.clauses
            .iter()
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(op, fields)| (op.clone(), Bson::Document(fields.clone())))
            .collect()
    }

    /// Wrap an already rendered update document.
    ///
    /// # Errors
    /// `InvalidArgument` if a top-level key is not a known update operator or
    /// its operand is not a document.
    pub fn from_document(update: BsonDocument) -> Result<Self> {
        let mut clauses = Vec::with_capacity(update.len());
        for (key, value) in update {
            if !UPDATE_OPERATORS.contains(&key.as_str()) {
                return Err(MnemosyneError::InvalidArgument(format!(
                    "unknown update operator '{}'",
                    key
                )));
            }
            match value {
                Bson::Document(fields) => clauses.push((key, fields)),
                _ => {
                    return Err(MnemosyneError::InvalidArgument(format!(
                        "operand of '{}' must be a document",
                        key
                    )))
                }
            }
        }
        Ok(Self { clauses })
    }

    fn operand_mut(&mut self, operator: &str) -> &mut BsonDocument {
        let index = match self.clauses.iter().position(|(op, _)| op == operator) {
            Some(index) => index,
            None => {
                self.clauses.push((operator.to_string(), BsonDocument::new()));
                self.clauses.len() - 1
            }
        };
        &mut self.clauses[index].1
    }

    fn remove_field(&mut self, operator: &str, path: &str) {
        if let Some(index) = self.clauses.iter().position(|(op, _)| op == operator) {
            let fields = &mut self.clauses[index].1;
            fields.remove(path);
            if fields.is_empty() {
                self.clauses.remove(index);
            }
        }
    }

    fn append(&mut self, operator: &str, path: &str, values: Vec<Bson>, each: bool) {
        let ops = self.operand_mut(operator);
        let mut items = match ops.remove(path) {
            None => {
                if !each && values.len() == 1 {
                    let single = values.into_iter().next().unwrap_or(Bson::Null);
                    ops.insert(path, single);
                    return;
                }
                Vec::new()
            }
            Some(Bson::Document(existing)) if existing.contains_key("$each") => existing
                .get_array("$each")
                .cloned()
                .unwrap_or_default(),
            Some(single) => vec![single],
        };
        items.extend(values);
        ops.insert(path, doc! { "$each": items });
    }
}

impl TryFrom<BsonDocument> for Operator {
    type Error = MnemosyneError;

    fn try_from(update: BsonDocument) -> Result<Self> {
        Self::from_document(update)
    }
}

fn numeric(path: &str, operator: &str, value: Bson) -> Result<Bson> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => Ok(value),
        other => Err(MnemosyneError::InvalidArgument(format!(
            "field '{}': {} requires a numeric operand, got {:?}",
            path,
            operator,
            other.element_type()
        ))),
    }
}

/// Fold two numeric operands, widening to i64 or f64 as needed
pub(crate) fn combine(
    a: &Bson,
    b: &Bson,
    float: impl Fn(f64, f64) -> f64,
    int: impl Fn(i64, i64) -> Option<i64>,
) -> Bson {
    let as_i64 = |v: &Bson| match v {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    };
    let as_f64 = |v: &Bson| match v {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    };

    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        if let Some(r) = int(x, y) {
            let both_i32 = matches!((a, b), (Bson::Int32(_), Bson::Int32(_)));
            return match i32::try_from(r) {
                Ok(small) if both_i32 => Bson::Int32(small),
                _ => Bson::Int64(r),
            };
        }
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => Bson::Double(float(x, y)),
        // Decimal128 operands are not folded; the latest one wins
        _ => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_operator_accumulates() {
        let mut op = Operator::new();
        op.set("a", 1).set("b", "x");
        assert_eq!(op.to_document(), doc! { "$set": { "a": 1, "b": "x" } });
    }

    #[test]
    fn test_set_then_unset_moves_field() {
        let mut op = Operator::new();
        op.set("a", 1).set("b", 2).unset("a");
        assert_eq!(
            op.to_document(),
            doc! { "$set": { "b": 2 }, "$unset": { "a": "" } }
        );

        op.set("a", 3);
        assert!(op.has("$set", "a"));
        assert!(!op.has("$unset", "a"));
        assert!(op.to_document().get("$unset").is_none());
    }

    #[test]
    fn test_inc_requires_numeric_and_sums() {
        let mut op = Operator::new();
        op.inc("n", 2).unwrap().inc("n", 3).unwrap();
        assert_eq!(op.to_document(), doc! { "$inc": { "n": 5 } });

        op.inc("n", 0.5).unwrap();
        assert_eq!(op.to_document(), doc! { "$inc": { "n": 5.5 } });

        let err = op.inc("n", "1").unwrap_err();
        assert!(matches!(err, MnemosyneError::InvalidArgument(_)));
    }

    #[test]
    fn test_mul() {
        let mut op = Operator::new();
        op.mul("price", 2).unwrap().mul("price", 3).unwrap();
        assert_eq!(op.to_document(), doc! { "$mul": { "price": 6 } });
        assert!(op.mul("price", true).is_err());
    }

    #[test]
    fn test_push_single_then_each() {
        let mut op = Operator::new();
        op.push("tags", "a");
        assert_eq!(op.to_document(), doc! { "$push": { "tags": "a" } });

        op.push("tags", "b");
        assert_eq!(
            op.to_document(),
            doc! { "$push": { "tags": { "$each": ["a", "b"] } } }
        );

        op.push_each("tags", ["c", "d"]);
        assert_eq!(
            op.to_document(),
            doc! { "$push": { "tags": { "$each": ["a", "b", "c", "d"] } } }
        );
    }

    #[test]
    fn test_push_each_on_fresh_field() {
        let mut op = Operator::new();
        op.push_each("tags", ["x"]);
        assert_eq!(
            op.to_document(),
            doc! { "$push": { "tags": { "$each": ["x"] } } }
        );
    }

    #[test]
    fn test_array_removal_operators() {
        let mut cond = Expression::new();
        cond.where_greater("qty", 5).unwrap();

        let mut op = Operator::new();
        op.pull("tags", "old")
            .pull_matching("items", &cond)
            .pull_all("ids", [1, 2])
            .pop_first("queue")
            .pop_last("stack");

        assert_eq!(
            op.to_document(),
            doc! {
                "$pull": { "tags": "old", "items": { "qty": { "$gt": 5 } } },
                "$pullAll": { "ids": [1, 2] },
                "$pop": { "queue": -1, "stack": 1 },
            }
        );
    }

    #[test]
    fn test_empty_operator() {
        assert!(Operator::new().is_empty());
        assert_eq!(Operator::new().to_document(), doc! {});
    }

    #[test]
    fn test_empty_operands_count_as_empty() {
        let op = Operator::from_document(doc! { "$set": {}, "$inc": {} }).unwrap();
        assert!(op.is_empty());
        assert_eq!(op.to_document(), doc! {});

        let op = Operator::from_document(doc! { "$set": {}, "$inc": { "n": 1 } }).unwrap();
        assert!(!op.is_empty());
        assert_eq!(op.to_document(), doc! { "$inc": { "n": 1 } });
    }

    #[test]
    fn test_from_document_round_trip() {
        let mut op = Operator::new();
        op.set("a", 1).rename("b", "c").current_date("updated");
        let rendered = op.to_document();
        assert_eq!(
            Operator::from_document(rendered.clone()).unwrap().to_document(),
            rendered
        );

        assert!(Operator::from_document(doc! { "a": 1 }).is_err());
        assert!(Operator::from_document(doc! { "$set": 1 }).is_err());
    }
}
