//! Aggregation stages, projection and sorting for the in-memory store

use super::compare::{as_f64, compare, is_number, values_equal};
use super::matcher::{matches, resolve};
use super::StoreError;
use crate::operator::combine;
use bson::{doc, Bson, Document as BsonDocument};
use mnemosyne_common::path::{get_path, remove_path, set_path};
use std::cmp::Ordering;

type StageResult = Result<Vec<BsonDocument>, StoreError>;

// ============================================================================
// Pipeline
// ============================================================================

/// Run `stages` over `input` in order.
///
/// `foreign` returns the records of another collection of the same database
/// and backs `$lookup`.
pub(crate) fn run_pipeline(
    input: Vec<BsonDocument>,
    stages: &[BsonDocument],
    foreign: &dyn Fn(&str) -> Vec<BsonDocument>,
) -> StageResult {
    let mut docs = input;
    for stage in stages {
        let mut entries = stage.iter();
        let (name, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(StoreError::BadValue(
                    "A pipeline stage specification object must contain exactly one field"
                        .to_string(),
                ))
            }
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = expect_document(name, body)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$group" => group(docs, expect_document(name, body)?)?,
            "$project" => docs
                .iter()
                .map(|doc| project(doc, expect_document(name, body)?))
                .collect::<Result<Vec<_>, _>>()?,
            "$addFields" => {
                let fields = expect_document(name, body)?;
                docs.into_iter()
                    .map(|mut doc| {
                        for (path, expr) in fields {
                            let value = evaluate(&doc, expr)?;
                            set_path(&mut doc, path, value);
                        }
                        Ok(doc)
                    })
                    .collect::<Result<Vec<_>, StoreError>>()?
            }
            "$sort" => {
                sort_documents(&mut docs, expect_document(name, body)?);
                docs
            }
            "$skip" => {
                let n = expect_count(name, body)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = expect_count(name, body)?;
                docs.truncate(n);
                docs
            }
            "$unwind" => unwind(docs, body)?,
            "$lookup" => lookup(docs, expect_document(name, body)?, foreign)?,
            "$count" => {
                let field = body.as_str().filter(|f| !f.is_empty() && !f.starts_with('$')).ok_or_else(|| {
                    StoreError::BadValue("the count field must be a non-empty string".to_string())
                })?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = BsonDocument::new();
                    counted.insert(field, count_value(docs.len()));
                    vec![counted]
                }
            }
            other => {
                return Err(StoreError::BadValue(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    other
                )))
            }
        };
    }
    Ok(docs)
}

fn expect_document<'a>(stage: &str, body: &'a Bson) -> Result<&'a BsonDocument, StoreError> {
    body.as_document().ok_or_else(|| {
        StoreError::BadValue(format!("{} specification must be an object", stage))
    })
}

fn expect_count(stage: &str, body: &Bson) -> Result<usize, StoreError> {
    match as_f64(body) {
        Some(n) if n >= 0.0 => Ok(n as usize),
        _ => Err(StoreError::BadValue(format!(
            "{} must be a non-negative number",
            stage
        ))),
    }
}

fn count_value(n: usize) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(n as i64),
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Evaluate an aggregation expression against one document
fn evaluate(doc: &BsonDocument, expr: &Bson) -> Result<Bson, StoreError> {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            Ok(get_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Array(items) => items
            .iter()
            .map(|item| evaluate(doc, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        Bson::Document(spec) => match spec.iter().next() {
            Some((op, operand)) if spec.len() == 1 && op.starts_with('$') => {
                evaluate_operator(doc, op, operand)
            }
            _ => {
                let mut out = BsonDocument::new();
                for (key, value) in spec {
                    out.insert(key.clone(), evaluate(doc, value)?);
                }
                Ok(Bson::Document(out))
            }
        },
        literal => Ok(literal.clone()),
    }
}

fn operands(doc: &BsonDocument, operand: &Bson) -> Result<Vec<Bson>, StoreError> {
    match operand {
        Bson::Array(items) => items.iter().map(|item| evaluate(doc, item)).collect(),
        single => Ok(vec![evaluate(doc, single)?]),
    }
}

fn evaluate_operator(doc: &BsonDocument, op: &str, operand: &Bson) -> Result<Bson, StoreError> {
    let value = match op {
        "$literal" => operand.clone(),
        "$add" => fold_numbers(operands(doc, operand)?, |a, b| {
            combine(a, b, |x, y| x + y, |x, y| x.checked_add(y))
        }),
        "$multiply" => fold_numbers(operands(doc, operand)?, |a, b| {
            combine(a, b, |x, y| x * y, |x, y| x.checked_mul(y))
        }),
        "$subtract" | "$divide" => {
            let args = operands(doc, operand)?;
            let [a, b] = args.as_slice() else {
                return Err(StoreError::BadValue(format!("{} takes exactly 2 arguments", op)));
            };
            match (as_f64(a), as_f64(b)) {
                (Some(_), Some(y)) if op == "$divide" && y == 0.0 => {
                    return Err(StoreError::BadValue("can't $divide by zero".to_string()))
                }
                (Some(x), Some(y)) if op == "$divide" => Bson::Double(x / y),
                (Some(_), Some(_)) => combine(a, &negate(b), |x, y| x + y, |x, y| x.checked_add(y)),
                _ => Bson::Null,
            }
        }
        "$concat" => {
            let mut out = String::new();
            for part in operands(doc, operand)? {
                match part {
                    Bson::String(s) => out.push_str(&s),
                    _ => return Ok(Bson::Null),
                }
            }
            Bson::String(out)
        }
        "$toUpper" | "$toLower" => match evaluate(doc, operand)? {
            Bson::String(s) if op == "$toUpper" => Bson::String(s.to_uppercase()),
            Bson::String(s) => Bson::String(s.to_lowercase()),
            _ => Bson::String(String::new()),
        },
        "$size" => match evaluate(doc, operand)? {
            Bson::Array(items) => count_value(items.len()),
            _ => return Err(StoreError::BadValue("The argument to $size must be an array".to_string())),
        },
        "$ifNull" => {
            let args = operands(doc, operand)?;
            args.iter()
                .find(|v| !matches!(v, Bson::Null))
                .cloned()
                .unwrap_or(Bson::Null)
        }
        other => {
            return Err(StoreError::BadValue(format!(
                "Unrecognized expression '{}'",
                other
            )))
        }
    };
    Ok(value)
}

fn negate(value: &Bson) -> Bson {
    match value {
        Bson::Int32(n) => n.checked_neg().map(Bson::Int32).unwrap_or(Bson::Int64(-(*n as i64))),
        Bson::Int64(n) => Bson::Int64(n.wrapping_neg()),
        Bson::Double(n) => Bson::Double(-n),
        other => other.clone(),
    }
}

fn fold_numbers(values: Vec<Bson>, step: impl Fn(&Bson, &Bson) -> Bson) -> Bson {
    let mut numbers = values.into_iter();
    let Some(mut total) = numbers.next() else {
        return Bson::Int32(0);
    };
    if !is_number(&total) {
        return Bson::Null;
    }
    for next in numbers {
        if !is_number(&next) {
            return Bson::Null;
        }
        total = step(&total, &next);
    }
    total
}

// ============================================================================
// $group
// ============================================================================

enum Accumulator {
    Sum(Bson),
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Option<Bson>),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self, StoreError> {
        let state = match op {
            "$sum" | "$count" => Accumulator::Sum(Bson::Int32(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => {
                return Err(StoreError::BadValue(format!(
                    "unknown group operator '{}'",
                    other
                )))
            }
        };
        Ok(state)
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum(total) => {
                if is_number(&value) {
                    *total = combine(total, &value, |a, b| a + b, |a, b| a.checked_add(b));
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| compare(&value, c) == Ordering::Less)
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| compare(&value, c) == Ordering::Greater)
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = Some(value),
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|existing| values_equal(existing, &value)) {
                    items.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) | Accumulator::Last(v) => {
                v.unwrap_or(Bson::Null)
            }
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
        }
    }
}

/// Groups keep first-seen order
fn group(docs: Vec<BsonDocument>, spec: &BsonDocument) -> StageResult {
    let key_expr = spec.get("_id").ok_or_else(|| {
        StoreError::BadValue("a group specification must include an _id".to_string())
    })?;

    let mut fields: Vec<(&str, &str, Bson)> = Vec::new();
    for (name, body) in spec.iter().filter(|(name, _)| name.as_str() != "_id") {
        let accumulator = body.as_document().and_then(|d| {
            let mut entries = d.iter();
            match (entries.next(), entries.next()) {
                (Some((op, arg)), None) => Some((op.as_str(), arg.clone())),
                _ => None,
            }
        });
        let (op, arg) = accumulator.ok_or_else(|| {
            StoreError::BadValue(format!("the group aggregate field '{}' must be an object with one operator", name))
        })?;
        // {$count: {}} counts documents
        let arg = if op == "$count" { Bson::Int32(1) } else { arg };
        fields.push((name.as_str(), op, arg));
    }

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = evaluate(doc, key_expr)?;
        let index = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(index) => index,
            None => {
                let states = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push((key, states));
                groups.len() - 1
            }
        };
        for ((_, _, arg), state) in fields.iter().zip(groups[index].1.iter_mut()) {
            state.add(evaluate(doc, arg)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = doc! { "_id": key };
            for ((name, _, _), state) in fields.iter().zip(states) {
                out.insert(*name, state.finish());
            }
            out
        })
        .collect())
}

// ============================================================================
// Projection, sort, unwind, lookup
// ============================================================================

fn is_falsy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => !b,
        other => as_f64(other) == Some(0.0),
    }
}

fn is_flag(value: &Bson) -> bool {
    matches!(value, Bson::Boolean(_)) || is_number(value)
}

/// Apply an inclusion or exclusion projection; `$project` may also compute
/// fields from expressions
pub(crate) fn project(doc: &BsonDocument, spec: &BsonDocument) -> Result<BsonDocument, StoreError> {
    let exclude_id = spec.get("_id").is_some_and(is_falsy);
    let others: Vec<(&String, &Bson)> = spec.iter().filter(|(k, _)| k.as_str() != "_id").collect();
    let excluding = others.iter().any(|(_, v)| is_flag(v) && is_falsy(v));
    let including = others.iter().any(|(_, v)| !is_flag(v) || !is_falsy(v));

    if excluding && including {
        return Err(StoreError::BadValue(
            "Cannot do exclusion and inclusion in the same projection".to_string(),
        ));
    }

    if excluding || (others.is_empty() && exclude_id) {
        let mut out = doc.clone();
        for (path, _) in &others {
            remove_path(&mut out, path);
        }
        if exclude_id {
            out.remove("_id");
        }
        return Ok(out);
    }

    let mut out = BsonDocument::new();
    if !exclude_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (path, value) in others {
        if is_flag(value) {
            if let Some(found) = get_path(doc, path) {
                set_path(&mut out, path, found.clone());
            }
        } else {
            set_path(&mut out, path, evaluate(doc, value)?);
        }
    }
    Ok(out)
}

/// Stable sort by a `{path: 1 | -1}` specification; missing sorts as null
pub(crate) fn sort_documents(docs: &mut [BsonDocument], spec: &BsonDocument) {
    let keys: Vec<(&str, bool)> = spec
        .iter()
        .map(|(path, dir)| (path.as_str(), as_f64(dir).map_or(true, |d| d >= 0.0)))
        .collect();
    docs.sort_by(|a, b| {
        for (path, ascending) in &keys {
            let left = get_path(a, path).unwrap_or(&Bson::Null);
            let right = get_path(b, path).unwrap_or(&Bson::Null);
            let ordering = compare(left, right);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn unwind(docs: Vec<BsonDocument>, body: &Bson) -> StageResult {
    let (path, preserve) = match body {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(spec) => (
            spec.get_str("path").map_err(|_| {
                StoreError::BadValue("$unwind requires a path".to_string())
            })?,
            spec.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(StoreError::BadValue("expected a string or an object as specification for $unwind stage".to_string())),
    };
    let path = path.strip_prefix('$').ok_or_else(|| {
        StoreError::BadValue("path option to $unwind stage should be prefixed with a '$'".to_string())
    })?;

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match get_path(&doc, path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn lookup(
    docs: Vec<BsonDocument>,
    spec: &BsonDocument,
    foreign: &dyn Fn(&str) -> Vec<BsonDocument>,
) -> StageResult {
    let field = |key: &str| {
        spec.get_str(key)
            .map_err(|_| StoreError::BadValue(format!("$lookup requires '{}'", key)))
    };
    let from = field("from")?;
    let local_field = field("localField")?;
    let foreign_field = field("foreignField")?;
    let output = field("as")?;

    let candidates = foreign(from);
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local = resolve(&doc, local_field)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let local = if local.is_empty() { vec![Bson::Null] } else { local };

        let joined: Vec<Bson> = candidates
            .iter()
            .filter(|candidate| {
                let values = resolve(candidate, foreign_field);
                let values: Vec<&Bson> = if values.is_empty() {
                    vec![&Bson::Null]
                } else {
                    values
                };
                local.iter().any(|l| {
                    values.iter().any(|v| {
                        values_equal(l, v)
                            || matches!(v, Bson::Array(items) if items.iter().any(|i| values_equal(l, i)))
                    })
                })
            })
            .cloned()
            .map(Bson::Document)
            .collect();
        set_path(&mut doc, output, Bson::Array(joined));
        out.push(doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_foreign(_: &str) -> Vec<BsonDocument> {
        Vec::new()
    }

    #[test]
    fn test_match_group_sort() {
        let docs = vec![
            doc! { "cust": "a", "amount": 2, "status": "A" },
            doc! { "cust": "b", "amount": 5, "status": "A" },
            doc! { "cust": "a", "amount": 3, "status": "A" },
            doc! { "cust": "a", "amount": 9, "status": "B" },
        ];
        let stages = vec![
            doc! { "$match": { "status": "A" } },
            doc! { "$group": { "_id": "$cust", "total": { "$sum": "$amount" }, "n": { "$sum": 1 } } },
            doc! { "$sort": { "total": -1 } },
        ];
        let out = run_pipeline(docs, &stages, &no_foreign).unwrap();
        assert_eq!(
            out,
            vec![
                doc! { "_id": "a", "total": 5, "n": 2 },
                doc! { "_id": "b", "total": 5, "n": 1 },
            ]
        );
    }

    #[test]
    fn test_group_keeps_int_sum() {
        let docs = vec![doc! { "p": 1 }, doc! { "p": 3 }, doc! { "p": 5 }];
        let stages = vec![doc! { "$group": { "_id": Bson::Null, "s": { "$sum": "$p" } } }];
        let out = run_pipeline(docs, &stages, &no_foreign).unwrap();
        assert_eq!(out[0].get("s"), Some(&Bson::Int32(9)));
    }

    #[test]
    fn test_unwind_and_count() {
        let docs = vec![doc! { "t": ["x", "y"] }, doc! { "t": [] }, doc! { "u": 1 }];
        let stages = vec![doc! { "$unwind": "$t" }, doc! { "$count": "n" }];
        let out = run_pipeline(docs, &stages, &no_foreign).unwrap();
        assert_eq!(out, vec![doc! { "n": 2 }]);
    }

    #[test]
    fn test_projection_modes() {
        let d = doc! { "_id": 1, "a": 1, "b": { "c": 2, "d": 3 } };
        assert_eq!(project(&d, &doc! { "b.c": 1 }).unwrap(), doc! { "_id": 1, "b": { "c": 2 } });
        assert_eq!(project(&d, &doc! { "a": 0, "_id": 0 }).unwrap(), doc! { "b": { "c": 2, "d": 3 } });
        assert!(project(&d, &doc! { "a": 0, "b": 1 }).is_err());
        assert_eq!(
            project(&d, &doc! { "_id": 0, "sum": { "$add": ["$a", "$b.c"] } }).unwrap(),
            doc! { "sum": 3 }
        );
    }

    #[test]
    fn test_lookup() {
        let orders = vec![doc! { "_id": 1, "item": "pen" }];
        let stock = |from: &str| {
            assert_eq!(from, "inventory");
            vec![doc! { "sku": "pen", "qty": 4 }, doc! { "sku": "ink", "qty": 1 }]
        };
        let stages = vec![doc! { "$lookup": {
            "from": "inventory", "localField": "item", "foreignField": "sku", "as": "stock"
        } }];
        let out = run_pipeline(orders, &stages, &stock).unwrap();
        assert_eq!(
            out[0].get_array("stock").unwrap(),
            &vec![Bson::Document(doc! { "sku": "pen", "qty": 4 })]
        );
    }

    #[test]
    fn test_unknown_stage() {
        let err = run_pipeline(vec![], &[doc! { "$teleport": {} }], &no_foreign).unwrap_err();
        assert!(err.to_string().contains("$teleport"));
    }
}
