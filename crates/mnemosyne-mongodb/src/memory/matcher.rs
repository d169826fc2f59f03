//! Filter evaluation against stored records

use super::compare::{as_f64, compare, same_bracket, values_equal};
use super::StoreError;
use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

type MatchResult = Result<bool, StoreError>;

/// Does `doc` satisfy `filter`?
pub(crate) fn matches(doc: &BsonDocument, filter: &BsonDocument) -> MatchResult {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => clauses(condition)?
                .iter()
                .map(|clause| matches(doc, clause))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .all(|m| m),
            "$or" => any_clause(doc, condition)?,
            "$nor" => !any_clause(doc, condition)?,
            "$comment" => true,
            op if op.starts_with('$') => {
                return Err(StoreError::UnknownOperator(op.to_string()));
            }
            path => match_path(doc, path, condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Bson) -> Result<Vec<&BsonDocument>, StoreError> {
    let items = match condition {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(StoreError::BadValue(
                "$and/$or/$nor must be a nonempty array".to_string(),
            ))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                StoreError::BadValue("$or/$and/$nor entries need to be full objects".to_string())
            })
        })
        .collect()
}

fn any_clause(doc: &BsonDocument, condition: &Bson) -> MatchResult {
    for clause in clauses(condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Values a dotted path resolves to, descending into arrays of documents
pub(crate) fn resolve<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            descend(value, rest, &mut out);
        }
    }
    out
}

fn descend<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*head) {
                descend(next, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    descend(next, rest, out);
                }
            }
            for item in items {
                if matches!(item, Bson::Document(_)) {
                    descend(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Each value plus, for arrays, each element
fn expanded<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn is_operator_document(value: &Bson) -> Option<&BsonDocument> {
    match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn match_path(doc: &BsonDocument, path: &str, condition: &Bson) -> MatchResult {
    let values = resolve(doc, path);
    match_values(&values, condition)
}

/// Evaluate a field condition against the values its path resolved to
pub(crate) fn match_values(values: &[&Bson], condition: &Bson) -> MatchResult {
    match condition {
        Bson::RegularExpression(regex) => {
            let compiled = compile(&regex.pattern, &regex.options)?;
            Ok(expanded(values).iter().any(|v| regex_hit(&compiled, v)))
        }
        other => match is_operator_document(other) {
            Some(ops) => match_operators(values, ops),
            None => Ok(equals_any(values, other)),
        },
    }
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if values.is_empty() {
        return matches!(target, Bson::Null);
    }
    expanded(values).iter().any(|v| values_equal(v, target))
}

fn match_operators(values: &[&Bson], ops: &BsonDocument) -> MatchResult {
    for (op, operand) in ops {
        let satisfied = match op.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compare_any(values, operand, |o| o == Ordering::Greater),
            "$gte" => compare_any(values, operand, |o| o != Ordering::Less),
            "$lt" => compare_any(values, operand, |o| o == Ordering::Less),
            "$lte" => compare_any(values, operand, |o| o != Ordering::Greater),
            "$in" => in_list(values, operand)?,
            "$nin" => !in_list(values, operand)?,
            "$all" => {
                let wanted = array_operand("$all", operand)?;
                !wanted.is_empty() && wanted.iter().all(|w| equals_any(values, w))
            }
            "$exists" => {
                let wanted = operand_truthy(operand);
                values.is_empty() != wanted
            }
            "$type" => type_matches(values, operand)?,
            "$regex" => {
                let options = ops.get_str("$options").unwrap_or_default();
                let compiled = match operand {
                    Bson::String(pattern) => compile(pattern, options)?,
                    Bson::RegularExpression(regex) => compile(&regex.pattern, &regex.options)?,
                    _ => return Err(StoreError::BadValue("$regex has to be a string".to_string())),
                };
                expanded(values).iter().any(|v| regex_hit(&compiled, v))
            }
            "$options" => true,
            "$elemMatch" => elem_match(values, operand)?,
            "$size" => {
                let size = as_f64(operand)
                    .ok_or_else(|| StoreError::BadValue("$size needs a number".to_string()))?;
                values
                    .iter()
                    .any(|v| matches!(v, Bson::Array(items) if items.len() as f64 == size))
            }
            "$mod" => {
                let pair = array_operand("$mod", operand)?;
                let (divisor, remainder) = match pair.as_slice() {
                    [d, r] => (as_f64(d), as_f64(r)),
                    _ => (None, None),
                };
                let (Some(divisor), Some(remainder)) = (divisor, remainder) else {
                    return Err(StoreError::BadValue(
                        "malformed mod, needs to be an array of two numbers".to_string(),
                    ));
                };
                if divisor as i64 == 0 {
                    return Err(StoreError::BadValue("divisor cannot be 0".to_string()));
                }
                expanded(values).iter().any(|v| {
                    as_f64(v).is_some_and(|n| {
                        (n as i64).wrapping_rem(divisor as i64) == remainder as i64
                    })
                })
            }
            "$not" => match operand {
                Bson::Document(_) | Bson::RegularExpression(_) => {
                    !match_values(values, operand)?
                }
                _ => {
                    return Err(StoreError::BadValue(
                        "$not needs a regex or a document".to_string(),
                    ))
                }
            },
            other => return Err(StoreError::UnknownOperator(other.to_string())),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare_any(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    expanded(values)
        .iter()
        .any(|v| same_bracket(v, operand) && accept(compare(v, operand)))
}

fn in_list(values: &[&Bson], operand: &Bson) -> MatchResult {
    let candidates = array_operand("$in", operand)?;
    for candidate in candidates {
        let hit = match candidate {
            Bson::RegularExpression(regex) => {
                let compiled = compile(&regex.pattern, &regex.options)?;
                expanded(values).iter().any(|v| regex_hit(&compiled, v))
            }
            other => equals_any(values, other),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn array_operand<'a>(op: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>, StoreError> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(StoreError::BadValue(format!("{} needs an array", op))),
    }
}

fn operand_truthy(operand: &Bson) -> bool {
    match operand {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn type_matches(values: &[&Bson], operand: &Bson) -> MatchResult {
    let wanted: Vec<&Bson> = match operand {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    for wanted in wanted {
        let code = type_code(wanted)?;
        if code == TypeCode::Array {
            if values.iter().any(|v| matches!(v, Bson::Array(_))) {
                return Ok(true);
            }
            continue;
        }
        if expanded(values).iter().any(|v| code.matches(v)) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCode {
    Double,
    String,
    Object,
    Array,
    Binary,
    ObjectId,
    Bool,
    Date,
    Null,
    Regex,
    Int,
    Timestamp,
    Long,
    Decimal,
    Number,
}

impl TypeCode {
    fn matches(self, value: &Bson) -> bool {
        match self {
            TypeCode::Double => matches!(value, Bson::Double(_)),
            TypeCode::String => matches!(value, Bson::String(_)),
            TypeCode::Object => matches!(value, Bson::Document(_)),
            TypeCode::Array => matches!(value, Bson::Array(_)),
            TypeCode::Binary => matches!(value, Bson::Binary(_)),
            TypeCode::ObjectId => matches!(value, Bson::ObjectId(_)),
            TypeCode::Bool => matches!(value, Bson::Boolean(_)),
            TypeCode::Date => matches!(value, Bson::DateTime(_)),
            TypeCode::Null => matches!(value, Bson::Null),
            TypeCode::Regex => matches!(value, Bson::RegularExpression(_)),
            TypeCode::Int => matches!(value, Bson::Int32(_)),
            TypeCode::Timestamp => matches!(value, Bson::Timestamp(_)),
            TypeCode::Long => matches!(value, Bson::Int64(_)),
            TypeCode::Decimal => matches!(value, Bson::Decimal128(_)),
            TypeCode::Number => matches!(
                value,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
            ),
        }
    }
}

fn type_code(operand: &Bson) -> Result<TypeCode, StoreError> {
    let code = match operand {
        Bson::String(alias) => match alias.as_str() {
            "double" => TypeCode::Double,
            "string" => TypeCode::String,
            "object" => TypeCode::Object,
            "array" => TypeCode::Array,
            "binData" => TypeCode::Binary,
            "objectId" => TypeCode::ObjectId,
            "bool" => TypeCode::Bool,
            "date" => TypeCode::Date,
            "null" => TypeCode::Null,
            "regex" => TypeCode::Regex,
            "int" => TypeCode::Int,
            "timestamp" => TypeCode::Timestamp,
            "long" => TypeCode::Long,
            "decimal" => TypeCode::Decimal,
            "number" => TypeCode::Number,
            other => return Err(StoreError::BadValue(format!("unknown type name alias: {}", other))),
        },
        other => match as_f64(other).map(|n| n as i64) {
            Some(1) => TypeCode::Double,
            Some(2) => TypeCode::String,
            Some(3) => TypeCode::Object,
            Some(4) => TypeCode::Array,
            Some(5) => TypeCode::Binary,
            Some(7) => TypeCode::ObjectId,
            Some(8) => TypeCode::Bool,
            Some(9) => TypeCode::Date,
            Some(10) => TypeCode::Null,
            Some(11) => TypeCode::Regex,
            Some(16) => TypeCode::Int,
            Some(17) => TypeCode::Timestamp,
            Some(18) => TypeCode::Long,
            Some(19) => TypeCode::Decimal,
            _ => return Err(StoreError::BadValue(format!("invalid numerical type code: {}", other))),
        },
    };
    Ok(code)
}

fn elem_match(values: &[&Bson], operand: &Bson) -> MatchResult {
    let criteria = operand
        .as_document()
        .ok_or_else(|| StoreError::BadValue("$elemMatch needs an Object".to_string()))?;
    let value_operators = criteria
        .keys()
        .all(|k| k.starts_with('$') && !matches!(k.as_str(), "$and" | "$or" | "$nor"));

    for value in values {
        let Bson::Array(items) = value else { continue };
        for item in items {
            let hit = if value_operators {
                match_operators(&[item], criteria)?
            } else {
                match item {
                    Bson::Document(inner) => matches(inner, criteria)?,
                    _ => false,
                }
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Element-level condition used by `$pull`
pub(crate) fn element_matches(element: &Bson, condition: &Bson) -> MatchResult {
    match condition {
        Bson::Document(criteria) if criteria.keys().all(|k| k.starts_with('$')) && !criteria.is_empty() => {
            match_operators(&[element], criteria)
        }
        Bson::Document(criteria) => match element {
            Bson::Document(inner) => matches(inner, criteria),
            _ => Ok(false),
        },
        other => Ok(values_equal(element, other)),
    }
}

fn compile(pattern: &str, options: &str) -> Result<regex::Regex, StoreError> {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    regex::Regex::new(&source)
        .map_err(|e| StoreError::BadValue(format!("invalid regular expression: {}", e)))
}

fn regex_hit(compiled: &regex::Regex, value: &Bson) -> bool {
    match value {
        Bson::String(s) | Bson::Symbol(s) => compiled.is_match(s),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn check(doc: BsonDocument, filter: BsonDocument) -> bool {
        matches(&doc, &filter).unwrap()
    }

    #[test]
    fn test_equality_and_missing() {
        assert!(check(doc! { "a": 1 }, doc! { "a": 1.0 }));
        assert!(check(doc! { "a": 1 }, doc! { "b": Bson::Null }));
        assert!(!check(doc! { "a": 1 }, doc! { "a": 2 }));
    }

    #[test]
    fn test_array_contains() {
        let d = doc! { "tags": ["x", "y"] };
        assert!(check(d.clone(), doc! { "tags": "y" }));
        assert!(check(d.clone(), doc! { "tags": ["x", "y"] }));
        assert!(check(d.clone(), doc! { "tags": { "$all": ["y", "x"] } }));
        assert!(check(d, doc! { "tags": { "$size": 2 } }));
    }

    #[test]
    fn test_ranges_stay_in_type_bracket() {
        let d = doc! { "param": 3 };
        assert!(check(d.clone(), doc! { "param": { "$gt": 2, "$lte": 3 } }));
        assert!(!check(d, doc! { "param": { "$gt": "2" } }));
    }

    #[test]
    fn test_nested_paths_through_arrays() {
        let d = doc! { "items": [{ "sku": "a", "qty": 1 }, { "sku": "b", "qty": 5 }] };
        assert!(check(d.clone(), doc! { "items.sku": "b" }));
        assert!(check(
            d.clone(),
            doc! { "items": { "$elemMatch": { "sku": "b", "qty": { "$gte": 5 } } } }
        ));
        assert!(!check(
            d,
            doc! { "items": { "$elemMatch": { "sku": "a", "qty": { "$gte": 5 } } } }
        ));
    }

    #[test]
    fn test_logical_combinators() {
        let d = doc! { "a": 1, "b": 2 };
        assert!(check(d.clone(), doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!check(d.clone(), doc! { "$nor": [{ "a": 1 }] }));
        assert!(check(d, doc! { "$and": [{ "a": 1 }, { "b": { "$in": [2, 3] } }] }));
    }

    #[test]
    fn test_regex_exists_type_mod_not() {
        let d = doc! { "name": "Alice", "n": 10 };
        assert!(check(d.clone(), doc! { "name": { "$regex": "^al", "$options": "i" } }));
        assert!(check(d.clone(), doc! { "name": { "$exists": true }, "zip": { "$exists": false } }));
        assert!(check(d.clone(), doc! { "n": { "$type": "int" } }));
        assert!(check(d.clone(), doc! { "n": { "$mod": [4, 2] } }));
        assert!(check(d, doc! { "n": { "$not": { "$gt": 20 } } }));
    }

    #[test]
    fn test_mod_at_integer_bounds() {
        let d = doc! { "n": i64::MIN };
        assert!(check(d.clone(), doc! { "n": { "$mod": [-1, 0] } }));
        assert!(!check(d, doc! { "n": { "$mod": [-1, 1] } }));
    }

    #[test]
    fn test_unknown_operator() {
        let err = matches(&doc! { "a": 1 }, &doc! { "a": { "$near": 1 } }).unwrap_err();
        assert!(matches!(err, StoreError::UnknownOperator(_)));
    }
}
