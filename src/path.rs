//! Dotted-path traversal over documents.
//!
//! Reads distinguish an absent value from an explicit null, and broadcast
//! over arrays encountered mid-path (the array-implicit semantics of
//! MongoDB filters). Writes auto-vivify missing intermediates.

use bson::{Bson, Document};

use crate::error::{Error, Result};

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    segment.parse::<usize>().ok()
}

/// Resolves a dotted path to every value it reaches, broadcasting over
/// arrays encountered mid-path. An empty result means the path is absent
/// everywhere, which is distinct from resolving to `Bson::Null`.
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    let segments: Vec<&str> = path.split('.').collect();
    match doc.get(segments[0]) {
        Some(value) => collect(value, &segments[1..], &mut out),
        None => {}
    }
    out
}

fn collect<'a>(value: &'a Bson, rest: &[&str], out: &mut Vec<&'a Bson>) {
    if rest.is_empty() {
        out.push(value);
        return;
    }
    let segment = rest[0];
    match *value {
        Bson::Document(ref doc) => {
            if let Some(inner) = doc.get(segment) {
                collect(inner, &rest[1..], out);
            }
        }
        Bson::Array(ref items) => {
            if let Some(index) = parse_index(segment) {
                if let Some(inner) = items.get(index) {
                    collect(inner, &rest[1..], out);
                }
            }
            // An array mid-path also broadcasts the remaining segments over
            // its document elements.
            for item in items {
                if let Bson::Document(ref doc) = *item {
                    if let Some(inner) = doc.get(segment) {
                        collect(inner, &rest[1..], out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Resolves a dotted path without array broadcast: only object keys and
/// explicit numeric indexes are followed. Used for sort keys, `$unwind`,
/// and projection, where a single value per document is expected.
pub fn resolve_direct<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current: Option<&Bson> = None;
    for (position, segment) in path.split('.').enumerate() {
        current = match current {
            None if position == 0 => doc.get(segment),
            Some(&Bson::Document(ref inner)) => inner.get(segment),
            Some(&Bson::Array(ref items)) => match parse_index(segment) {
                Some(index) => items.get(index),
                None => return None,
            },
            _ => return None,
        };
        current?;
    }
    current
}

/// Writes `value` at `path`, creating missing intermediates: a name segment
/// vivifies an empty document, a numeric segment vivifies a null-padded
/// array. A numeric segment beneath an existing non-array value is a type
/// error, mirroring the server's "cannot use the part to traverse" failure.
pub fn set(doc: &mut Document, path: &str, value: Bson) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    set_in_document(doc, &segments, value, path)
}

fn set_in_document(doc: &mut Document, segments: &[&str], value: Bson, full: &str) -> Result<()> {
    let head = segments[0];
    if segments.len() == 1 {
        doc.insert(head.to_owned(), value);
        return Ok(());
    }
    if doc.get(head).is_none() {
        doc.insert(head.to_owned(), vivify(segments[1]));
    }
    match *doc.get_mut(head).unwrap() {
        Bson::Document(ref mut inner) => set_in_document(inner, &segments[1..], value, full),
        Bson::Array(ref mut items) => set_in_array(items, &segments[1..], value, full),
        _ => Err(traverse_error(head, full)),
    }
}

fn set_in_array(items: &mut Vec<Bson>, segments: &[&str], value: Bson, full: &str) -> Result<()> {
    let head = segments[0];
    let index = match parse_index(head) {
        Some(index) => index,
        None => return Err(traverse_error(head, full)),
    };
    while items.len() <= index {
        items.push(Bson::Null);
    }
    if segments.len() == 1 {
        items[index] = value;
        return Ok(());
    }
    if matches!(items[index], Bson::Null) {
        items[index] = vivify(segments[1]);
    }
    match items[index] {
        Bson::Document(ref mut inner) => set_in_document(inner, &segments[1..], value, full),
        Bson::Array(ref mut inner) => set_in_array(inner, &segments[1..], value, full),
        _ => Err(traverse_error(head, full)),
    }
}

fn vivify(next_segment: &str) -> Bson {
    if parse_index(next_segment).is_some() {
        Bson::Array(Vec::new())
    } else {
        Bson::Document(Document::new())
    }
}

fn traverse_error(segment: &str, full: &str) -> Error {
    Error::TypeMismatch(format!(
        "cannot use the part ({}) of ({}) to traverse the element",
        segment, full
    ))
}

/// Removes the leaf at `path` and returns it. Intermediates are left in
/// place even if they become empty. Removing an array element by index
/// nulls the slot rather than shifting later elements.
pub fn unset(doc: &mut Document, path: &str) -> Option<Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    unset_in_document(doc, &segments)
}

fn unset_in_document(doc: &mut Document, segments: &[&str]) -> Option<Bson> {
    let head = segments[0];
    if segments.len() == 1 {
        return doc.remove(head);
    }
    match doc.get_mut(head) {
        Some(&mut Bson::Document(ref mut inner)) => unset_in_document(inner, &segments[1..]),
        Some(&mut Bson::Array(ref mut items)) => unset_in_array(items, &segments[1..]),
        _ => None,
    }
}

fn unset_in_array(items: &mut Vec<Bson>, segments: &[&str]) -> Option<Bson> {
    let head = segments[0];
    let index = parse_index(head)?;
    if index >= items.len() {
        return None;
    }
    if segments.len() == 1 {
        let removed = std::mem::replace(&mut items[index], Bson::Null);
        return Some(removed);
    }
    match items[index] {
        Bson::Document(ref mut inner) => unset_in_document(inner, &segments[1..]),
        Bson::Array(ref mut inner) => unset_in_array(inner, &segments[1..]),
        _ => None,
    }
}

/// Whether one path equals the other or is a strict parent of it. Update
/// validation rejects operators whose target paths conflict this way.
pub fn paths_conflict(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
    longer.starts_with(shorter) && longer.as_bytes()[shorter.len()] == b'.'
}
