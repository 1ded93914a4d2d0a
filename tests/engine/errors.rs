use bson::{bson, doc};
use mongolite::{Error, ErrorCode};

use super::db;

#[test]
fn error_codes_are_stable() {
    assert_eq!(ErrorCode::BadValue.code(), 2);
    assert_eq!(ErrorCode::FailedToParse.code(), 9);
    assert_eq!(ErrorCode::TypeMismatch.code(), 14);
    assert_eq!(ErrorCode::InvalidObjectId.code(), 15);
    assert_eq!(ErrorCode::DuplicateKey.code(), 11000);
    assert_eq!(ErrorCode::Interrupted.code(), 11601);
    assert_eq!(ErrorCode::InvalidPipeline.code(), 40324);
}

#[test]
fn bad_queries_surface_code_2() {
    let db = db();
    let coll = db.collection("c");
    coll.insert_one(doc! {"_id": 1}).unwrap();
    for filter in vec![
        doc! {"$what": 1},
        doc! {"a": {"$almost": 3}},
        doc! {"a": {"$in": 3}},
        doc! {"a": {"$size": -1}},
        doc! {"a": {"$mod": [0, 1]}},
        doc! {"a": {"$regex": "(", "$options": ""}},
        doc! {"a": {"$regex": "x", "$options": "q"}},
        doc! {"$or": "not an array"},
    ] {
        let err = coll.find(Some(filter.clone()), None).unwrap_err();
        assert_eq!(err.code(), Some(2), "filter: {}", filter);
    }
}

#[test]
fn bad_updates_surface_code_9() {
    let db = db();
    let coll = db.collection("c");
    coll.insert_one(doc! {"_id": 1, "a": 1}).unwrap();
    for update in vec![
        doc! {"$frob": {"a": 1}},
        doc! {"$set": {"a": 1}, "$inc": {"a": 1}},
        doc! {"$set": {"_id": 2}},
        doc! {"plain": 1, "$set": {"a": 1}},
    ] {
        let err = coll
            .update_one(doc! {"_id": 1}, update.clone(), None)
            .unwrap_err();
        assert_eq!(err.code(), Some(9), "update: {}", update);
    }
}

#[test]
fn type_mismatches_surface_code_14() {
    let db = db();
    let coll = db.collection("c");
    coll.insert_one(doc! {"_id": 1, "s": "text", "n": 3}).unwrap();
    let cases = vec![
        doc! {"$inc": {"s": 1}},
        doc! {"$mul": {"s": 2}},
        doc! {"$push": {"n": 1}},
        doc! {"$addToSet": {"n": 1}},
        doc! {"$pop": {"n": 1}},
    ];
    for update in cases {
        let err = coll
            .update_one(doc! {"_id": 1}, update.clone(), None)
            .unwrap_err();
        assert_eq!(err.code(), Some(14), "update: {}", update);
    }
}

#[test]
fn object_id_parsing_surfaces_code_15() {
    let err = mongolite::parse_object_id("nothex").unwrap_err();
    assert_eq!(err.code(), Some(15));
    let err = mongolite::parse_object_id("zzzzzzzzzzzzzzzzzzzzzzzz").unwrap_err();
    assert_eq!(err.code(), Some(15));

    let oid = mongolite::parse_object_id("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(oid.to_hex(), "507f1f77bcf86cd799439011");
}

#[test]
fn duplicate_key_error_message_shape() {
    let db = db();
    let coll = db.collection("c");
    coll.insert_one(doc! {"_id": "k"}).unwrap();
    let err = coll.insert_one(doc! {"_id": "k"}).unwrap_err();
    match err {
        Error::WriteError(ref exc) => {
            assert_eq!(exc.code, 11000);
            assert!(exc.message.starts_with("E11000 duplicate key error"));
            assert!(exc.message.contains("test.c"));
        }
        ref other => panic!("expected a write error, got {:?}", other),
    }
}

#[test]
fn unmatched_writes_are_not_errors() {
    let db = db();
    let coll = db.collection("c");
    let update = coll
        .update_one(doc! {"missing": true}, doc! {"$set": {"a": 1}}, None)
        .unwrap();
    assert_eq!(update.matched_count, 0);
    assert_eq!(update.modified_count, 0);
    let delete = coll.delete_many(doc! {"missing": true}).unwrap();
    assert_eq!(delete.deleted_count, 0);
}
