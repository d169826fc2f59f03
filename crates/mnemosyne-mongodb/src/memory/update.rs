//! Update operator application

use super::compare::{compare, is_number, values_equal};
use super::matcher::element_matches;
use super::StoreError;
use crate::operator::combine;
use bson::{Bson, DateTime, Document as BsonDocument, Timestamp};
use mnemosyne_common::path::{get_path, remove_path, set_path};
use std::cmp::Ordering;

/// Apply `update` to `doc` in place; returns whether anything changed.
///
/// A document without operator keys replaces every field except `_id`.
/// `$setOnInsert` only applies when `inserting`.
pub(crate) fn apply_update(
    doc: &mut BsonDocument,
    update: &BsonDocument,
    inserting: bool,
) -> Result<bool, StoreError> {
    let before = doc.clone();
    let is_replacement = update.keys().all(|k| !k.starts_with('$'));

    if is_replacement {
        replace(doc, update)?;
    } else {
        for (op, operand) in update {
            let fields = operand.as_document().ok_or_else(|| {
                StoreError::BadValue(format!("Modifiers operate on fields but we found {}", operand))
            })?;
            for (path, value) in fields {
                if path == "_id" && op != "$setOnInsert" {
                    let unchanged = op == "$set" && doc.get("_id").is_some_and(|id| values_equal(id, value));
                    if !unchanged {
                        return Err(StoreError::ImmutableField("_id".to_string()));
                    }
                }
                apply_one(doc, op, path, value, inserting)?;
            }
        }
    }
    Ok(*doc != before)
}

fn replace(doc: &mut BsonDocument, replacement: &BsonDocument) -> Result<(), StoreError> {
    let id = doc.get("_id").cloned();
    if let (Some(id), Some(new_id)) = (&id, replacement.get("_id")) {
        if !values_equal(id, new_id) {
            return Err(StoreError::ImmutableField("_id".to_string()));
        }
    }
    let mut next = BsonDocument::new();
    if let Some(id) = id {
        next.insert("_id", id);
    }
    for (key, value) in replacement {
        if key != "_id" {
            next.insert(key.clone(), value.clone());
        }
    }
    *doc = next;
    Ok(())
}

fn apply_one(
    doc: &mut BsonDocument,
    op: &str,
    path: &str,
    value: &Bson,
    inserting: bool,
) -> Result<(), StoreError> {
    match op {
        "$set" => set_path(doc, path, value.clone()),
        "$unset" => {
            remove_path(doc, path);
        }
        "$setOnInsert" => {
            if inserting {
                set_path(doc, path, value.clone());
            }
        }
        "$inc" => arithmetic(doc, "$inc", path, value, |current, amount| {
            combine(current, amount, |a, b| a + b, |a, b| a.checked_add(b))
        })?,
        "$mul" => arithmetic(doc, "$mul", path, value, |current, factor| {
            combine(current, factor, |a, b| a * b, |a, b| a.checked_mul(b))
        })?,
        "$min" => keep_extreme(doc, path, value, Ordering::Less),
        "$max" => keep_extreme(doc, path, value, Ordering::Greater),
        "$rename" => {
            let target = value.as_str().ok_or_else(|| {
                StoreError::BadValue(format!("The 'to' field for $rename must be a string: {}", value))
            })?;
            if let Some(moved) = remove_path(doc, path) {
                set_path(doc, target, moved);
            }
        }
        "$currentDate" => {
            let stamp = match value {
                Bson::Document(spec) if spec.get_str("$type").ok() == Some("timestamp") => {
                    let now = DateTime::now().timestamp_millis();
                    Bson::Timestamp(Timestamp {
                        time: (now / 1000) as u32,
                        increment: 1,
                    })
                }
                _ => Bson::DateTime(DateTime::now()),
            };
            set_path(doc, path, stamp);
        }
        "$push" => {
            let items = each_operand(value);
            array_mut(doc, path)?.extend(items);
        }
        "$addToSet" => {
            let items = each_operand(value);
            let target = array_mut(doc, path)?;
            for item in items {
                if !target.iter().any(|existing| values_equal(existing, &item)) {
                    target.push(item);
                }
            }
        }
        "$pull" => {
            if let Some(target) = existing_array_mut(doc, path)? {
                let mut kept = Vec::with_capacity(target.len());
                for item in target.drain(..) {
                    if !element_matches(&item, value)? {
                        kept.push(item);
                    }
                }
                *target = kept;
            }
        }
        "$pullAll" => {
            let removed = match value {
                Bson::Array(items) => items.clone(),
                _ => return Err(StoreError::BadValue("$pullAll requires an array argument".to_string())),
            };
            if let Some(target) = existing_array_mut(doc, path)? {
                target.retain(|item| !removed.iter().any(|r| values_equal(item, r)));
            }
        }
        "$pop" => {
            let from_front = match value {
                Bson::Int32(n) => *n < 0,
                Bson::Int64(n) => *n < 0,
                Bson::Double(n) => *n < 0.0,
                _ => return Err(StoreError::BadValue("$pop expects 1 or -1".to_string())),
            };
            if let Some(target) = existing_array_mut(doc, path)? {
                if !target.is_empty() {
                    if from_front {
                        target.remove(0);
                    } else {
                        target.pop();
                    }
                }
            }
        }
        other => return Err(StoreError::UnknownOperator(other.to_string())),
    }
    Ok(())
}

fn arithmetic(
    doc: &mut BsonDocument,
    op: &str,
    path: &str,
    operand: &Bson,
    fold: impl Fn(&Bson, &Bson) -> Bson,
) -> Result<(), StoreError> {
    if !is_number(operand) {
        return Err(StoreError::TypeMismatch(format!(
            "Cannot {} with non-numeric argument: {{{}: {}}}",
            op.trim_start_matches('$'),
            path,
            operand
        )));
    }
    let next = match get_path(doc, path) {
        None => match op {
            // multiplying a missing field yields a zero of the operand's type
            "$mul" => fold(&zero_like(operand), operand),
            _ => operand.clone(),
        },
        Some(current) if is_number(current) => fold(current, operand),
        Some(current) => {
            return Err(StoreError::TypeMismatch(format!(
                "Cannot apply {} to a value of non-numeric type. {{_id: ...}} has the field '{}' of non-numeric type {:?}",
                op,
                path,
                current.element_type()
            )))
        }
    };
    set_path(doc, path, next);
    Ok(())
}

fn zero_like(operand: &Bson) -> Bson {
    match operand {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

fn keep_extreme(doc: &mut BsonDocument, path: &str, value: &Bson, wanted: Ordering) {
    let replace = match get_path(doc, path) {
        None => true,
        Some(current) => compare(value, current) == wanted,
    };
    if replace {
        set_path(doc, path, value.clone());
    }
}

fn each_operand(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(spec) if spec.contains_key("$each") => {
            spec.get_array("$each").cloned().unwrap_or_default()
        }
        single => vec![single.clone()],
    }
}

/// Array at `path`, created empty when missing
fn array_mut<'a>(doc: &'a mut BsonDocument, path: &str) -> Result<&'a mut Vec<Bson>, StoreError> {
    if get_path(doc, path).is_none() {
        set_path(doc, path, Bson::Array(Vec::new()));
    }
    existing_array_mut(doc, path)?
        .ok_or_else(|| StoreError::BadValue(format!("The field '{}' must be an array", path)))
}

/// Array at `path`; `None` when missing, an error when not an array
fn existing_array_mut<'a>(
    doc: &'a mut BsonDocument,
    path: &str,
) -> Result<Option<&'a mut Vec<Bson>>, StoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((first, rest)) = segments.split_first() else {
        return Ok(None);
    };
    match doc.get_mut(*first).and_then(|value| descend_mut(value, rest)) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(other) => Err(StoreError::BadValue(format!(
            "Cannot apply array update to non-array field '{}' of type {:?}",
            path,
            other.element_type()
        ))),
    }
}

fn descend_mut<'a>(value: &'a mut Bson, segments: &[&str]) -> Option<&'a mut Bson> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value);
    };
    match value {
        Bson::Document(inner) => inner.get_mut(*head).and_then(|next| descend_mut(next, rest)),
        Bson::Array(items) => head
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get_mut(index))
            .and_then(|next| descend_mut(next, rest)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn updated(mut doc: BsonDocument, update: BsonDocument) -> BsonDocument {
        apply_update(&mut doc, &update, false).unwrap();
        doc
    }

    #[test]
    fn test_set_unset_inc() {
        let d = updated(
            doc! { "_id": 1, "a": 1, "b": 2, "n": 5 },
            doc! { "$set": { "a": 10, "p.q": 1 }, "$unset": { "b": "" }, "$inc": { "n": 2, "m": 1 } },
        );
        assert_eq!(d, doc! { "_id": 1, "a": 10, "n": 7, "p": { "q": 1 }, "m": 1 });
    }

    #[test]
    fn test_inc_rejects_non_numeric_target() {
        let mut d = doc! { "a": "x" };
        let err = apply_update(&mut d, &doc! { "$inc": { "a": 1 } }, false).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch(_)));
    }

    #[test]
    fn test_array_operators() {
        let d = updated(
            doc! { "tags": ["a", "b", "c"], "nums": [1, 2, 3, 4] },
            doc! {
                "$push": { "tags": { "$each": ["d", "e"] } },
                "$addToSet": { "more": "x" },
                "$pull": { "nums": { "$gte": 3 } },
                "$pop": { "tags": -1 },
            },
        );
        assert_eq!(
            d,
            doc! { "tags": ["b", "c", "d", "e"], "nums": [1, 2], "more": ["x"] }
        );
    }

    #[test]
    fn test_add_to_set_skips_existing() {
        let d = updated(
            doc! { "s": [1, 2] },
            doc! { "$addToSet": { "s": { "$each": [2, 3] } } },
        );
        assert_eq!(d, doc! { "s": [1, 2, 3] });
    }

    #[test]
    fn test_replacement_keeps_id() {
        let d = updated(doc! { "_id": 7, "a": 1 }, doc! { "b": 2 });
        assert_eq!(d, doc! { "_id": 7, "b": 2 });
    }

    #[test]
    fn test_id_is_immutable() {
        let mut d = doc! { "_id": 1 };
        assert!(apply_update(&mut d, &doc! { "$set": { "_id": 2 } }, false).is_err());
        assert!(apply_update(&mut d, &doc! { "$set": { "_id": 1 } }, false).is_ok());
    }

    #[test]
    fn test_set_on_insert_only_when_inserting() {
        let mut d = doc! { "a": 1 };
        apply_update(&mut d, &doc! { "$setOnInsert": { "b": 1 } }, false).unwrap();
        assert!(!d.contains_key("b"));
        apply_update(&mut d, &doc! { "$setOnInsert": { "b": 1 } }, true).unwrap();
        assert!(d.contains_key("b"));
    }

    #[test]
    fn test_min_max_rename() {
        let d = updated(
            doc! { "lo": 5, "hi": 5, "old": "v" },
            doc! { "$min": { "lo": 3 }, "$max": { "hi": 3 }, "$rename": { "old": "new" } },
        );
        assert_eq!(d, doc! { "lo": 3, "hi": 5, "new": "v" });
    }
}
