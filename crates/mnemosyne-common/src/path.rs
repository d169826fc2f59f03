//! Dotted field paths over BSON documents
//!
//! `a.b.c` walks nested documents; a purely numeric segment indexes into an
//! array (`tags.0`).

use bson::{Bson, Document as BsonDocument};

/// Resolve a dotted path
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = step(current, segment)?;
    }
    Some(current)
}

fn step<'a>(value: &'a Bson, segment: &str) -> Option<&'a Bson> {
    match value {
        Bson::Document(d) => d.get(segment),
        Bson::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// True if the path resolves to a value (including null)
pub fn has_path(doc: &BsonDocument, path: &str) -> bool {
    get_path(doc, path).is_some()
}

/// Set a dotted path, creating intermediate documents as needed.
///
/// A non-document intermediate value is replaced by a document.
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if let Some(Bson::Array(items)) = doc.get_mut(head) {
                if let Some((index, tail)) = array_segment(rest) {
                    if let Some(slot) = items.get_mut(index) {
                        match (slot, tail) {
                            (slot, None) => *slot = value,
                            (Bson::Document(inner), Some(tail)) => set_path(inner, tail, value),
                            (slot, Some(tail)) => {
                                let mut inner = BsonDocument::new();
                                set_path(&mut inner, tail, value);
                                *slot = Bson::Document(inner);
                            }
                        }
                        return;
                    }
                }
            }
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, BsonDocument::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn array_segment(rest: &str) -> Option<(usize, Option<&str>)> {
    let (index, tail) = match rest.split_once('.') {
        Some((index, tail)) => (index, Some(tail)),
        None => (rest, None),
    };
    index.parse::<usize>().ok().map(|i| (i, tail))
}

/// Remove a dotted path, returning the removed value
pub fn remove_path(doc: &mut BsonDocument, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// True if `ancestor` is a strict prefix path of `path` (`a` of `a.b`)
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_get_nested_and_array() {
        let d = doc! { "k": { "kk": "A", "f": "F1" }, "tags": ["x", { "n": 2 }] };
        assert_eq!(get_path(&d, "k.kk"), Some(&Bson::String("A".into())));
        assert_eq!(get_path(&d, "tags.0"), Some(&Bson::String("x".into())));
        assert_eq!(get_path(&d, "tags.1.n"), Some(&Bson::Int32(2)));
        assert_eq!(get_path(&d, "k.missing"), None);
        assert_eq!(get_path(&d, "k.kk.deeper"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut d = doc! {};
        set_path(&mut d, "a.b.c", Bson::Int32(1));
        assert_eq!(d, doc! { "a": { "b": { "c": 1 } } });

        set_path(&mut d, "a.b.d", Bson::Int32(2));
        assert_eq!(d, doc! { "a": { "b": { "c": 1, "d": 2 } } });
    }

    #[test]
    fn test_set_replaces_scalar_intermediate() {
        let mut d = doc! { "a": 5 };
        set_path(&mut d, "a.b", Bson::Int32(1));
        assert_eq!(d, doc! { "a": { "b": 1 } });
    }

    #[test]
    fn test_set_array_element() {
        let mut d = doc! { "tags": ["x", "y"] };
        set_path(&mut d, "tags.1", Bson::String("z".into()));
        assert_eq!(d, doc! { "tags": ["x", "z"] });
    }

    #[test]
    fn test_remove_path() {
        let mut d = doc! { "a": { "b": 1, "c": 2 } };
        assert_eq!(remove_path(&mut d, "a.b"), Some(Bson::Int32(1)));
        assert_eq!(d, doc! { "a": { "c": 2 } });
        assert_eq!(remove_path(&mut d, "a.zz"), None);
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor("a", "a.b"));
        assert!(!is_ancestor("a", "ab"));
        assert!(!is_ancestor("a.b", "a.b"));
    }
}
