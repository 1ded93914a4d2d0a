use bson::{bson, doc, Bson, Document};
use mongolite::path::{paths_conflict, resolve, resolve_direct, set, unset};

#[test]
fn resolve_broadcasts_over_arrays() {
    let doc = doc! {
        "items": [{"qty": 2}, {"qty": 7}, "loose"]
    };
    let values = resolve(&doc, "items.qty");
    assert_eq!(values.len(), 2);
    assert_eq!(values[1], &Bson::I32(7));
}

#[test]
fn resolve_follows_numeric_index() {
    let doc = doc! { "items": [{"qty": 2}, {"qty": 7}] };
    let values = resolve(&doc, "items.1.qty");
    assert_eq!(values, vec![&Bson::I32(7)]);
    assert_eq!(resolve_direct(&doc, "items.1.qty"), Some(&Bson::I32(7)));
}

#[test]
fn absent_is_distinct_from_null() {
    let doc = doc! { "a": (Bson::Null) };
    assert_eq!(resolve(&doc, "a"), vec![&Bson::Null]);
    assert!(resolve(&doc, "b").is_empty());
}

#[test]
fn set_vivifies_documents_and_arrays() {
    let mut doc = Document::new();
    set(&mut doc, "a.b", Bson::I64(1)).unwrap();
    assert_eq!(resolve_direct(&doc, "a.b"), Some(&Bson::I64(1)));

    let mut doc = Document::new();
    set(&mut doc, "arr.2", Bson::String("x".to_owned())).unwrap();
    let items = doc.get_array("arr").unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Bson::Null);
    assert_eq!(items[2], Bson::String("x".to_owned()));
}

#[test]
fn set_numeric_segment_under_scalar_fails() {
    let mut doc = doc! { "a": 5 };
    assert!(set(&mut doc, "a.0", Bson::I64(1)).is_err());
}

#[test]
fn unset_keeps_empty_intermediates() {
    let mut doc = doc! { "a": {"b": 1} };
    assert_eq!(unset(&mut doc, "a.b"), Some(Bson::I32(1)));
    assert!(doc.get_document("a").unwrap().is_empty());
}

#[test]
fn conflicts() {
    assert!(paths_conflict("a", "a"));
    assert!(paths_conflict("a", "a.b"));
    assert!(paths_conflict("a.b", "a"));
    assert!(!paths_conflict("a", "ab"));
    assert!(!paths_conflict("a.b", "a.c"));
}
