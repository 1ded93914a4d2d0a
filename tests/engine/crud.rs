use bson::{bson, doc, Bson};
use mongolite::coll::options::{
    FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOptions, ReturnDocument, UpdateOptions,
};
use mongolite::Error;

use super::db;

#[test]
fn insert_assigns_object_id() {
    let db = db();
    let coll = db.collection("people");
    let result = coll.insert_one(doc! {"name": "Ada"}).unwrap();
    let id = match result.inserted_id {
        Some(Bson::ObjectId(oid)) => oid,
        other => panic!("expected a generated ObjectId, got {:?}", other),
    };
    assert_eq!(id.to_hex().len(), 24);
    assert!(id.to_hex().chars().all(|c| c.is_ascii_hexdigit()));

    let stored = coll.find_one(Some(doc! {"name": "Ada"}), None).unwrap().unwrap();
    assert_eq!(stored.get_object_id("_id").unwrap(), &id);
}

#[test]
fn insert_keeps_caller_id_and_puts_it_first() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_one(doc! {"name": "widget", "_id": "k1"}).unwrap();
    let stored = coll.find_one(Some(doc! {"_id": "k1"}), None).unwrap().unwrap();
    let keys: Vec<&String> = stored.keys().collect();
    assert_eq!(keys[0], "_id");
    assert_eq!(stored.get_str("name").unwrap(), "widget");
}

#[test]
fn duplicate_key_fails_and_keeps_first_document() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_one(doc! {"_id": "abc", "v": 1}).unwrap();

    let err = coll.insert_one(doc! {"_id": "abc", "v": 2}).unwrap_err();
    assert_eq!(err.code(), Some(11000));
    let message = err.to_string();
    assert!(message.contains("E11000"), "message was: {}", message);
    assert!(message.contains("duplicate key"), "message was: {}", message);

    let stored = coll.find_one(Some(doc! {"_id": "abc"}), None).unwrap().unwrap();
    assert_eq!(stored.get_i64("v").unwrap(), 1);
    assert_eq!(coll.count_documents(None, None).unwrap(), 1);
}

#[test]
fn insert_many_reports_ids_by_index() {
    let db = db();
    let coll = db.collection("items");
    let result = coll
        .insert_many(vec![
            doc! {"_id": "a"},
            doc! {"_id": "b"},
            doc! {"_id": "c"},
        ])
        .unwrap();
    assert_eq!(result.inserted_count, 3);
    assert_eq!(result.inserted_ids[&1], Bson::String("b".to_owned()));
}

#[test]
fn insert_many_stops_at_duplicate_with_partial_ids() {
    let db = db();
    let coll = db.collection("items");
    let err = coll
        .insert_many(vec![
            doc! {"_id": "a"},
            doc! {"_id": "a"},
            doc! {"_id": "b"},
        ])
        .unwrap_err();
    match err {
        Error::BulkWriteError(exc) => {
            assert_eq!(exc.inserted_ids.len(), 1);
            assert_eq!(exc.write_errors[0].index, 1);
            assert_eq!(exc.write_errors[0].code, 11000);
        }
        other => panic!("expected a bulk write error, got {:?}", other),
    }
    // The third document was never attempted.
    assert_eq!(coll.count_documents(None, None).unwrap(), 1);
}

#[test]
fn update_one_counts_matched_vs_modified() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_one(doc! {"_id": 1, "v": 5}).unwrap();

    let result = coll
        .update_one(doc! {"_id": 1}, doc! {"$set": {"v": 6}}, None)
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    // Setting the same value matches without modifying.
    let result = coll
        .update_one(doc! {"_id": 1}, doc! {"$set": {"v": 6}}, None)
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 0);

    let result = coll
        .update_one(doc! {"_id": 99}, doc! {"$set": {"v": 1}}, None)
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert_eq!(result.upserted_count, 0);
}

#[test]
fn update_many_touches_every_match() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_many(vec![
        doc! {"_id": 1, "group": "a", "v": 1},
        doc! {"_id": 2, "group": "a", "v": 2},
        doc! {"_id": 3, "group": "b", "v": 3},
    ])
    .unwrap();

    let result = coll
        .update_many(doc! {"group": "a"}, doc! {"$inc": {"v": 10}}, None)
        .unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 2);

    let untouched = coll.find_one(Some(doc! {"_id": 3}), None).unwrap().unwrap();
    assert_eq!(untouched.get_i64("v").unwrap(), 3);
}

#[test]
fn upsert_synthesises_from_filter_and_update() {
    let db = db();
    let coll = db.collection("people");
    let mut options = UpdateOptions::new();
    options.upsert = true;
    let result = coll
        .update_one(doc! {"name": "new"}, doc! {"$set": {"age": 20}}, Some(options))
        .unwrap();
    assert_eq!(result.upserted_count, 1);
    assert!(result.upserted_id.is_some());

    let stored = coll.find_one(Some(doc! {"name": "new"}), None).unwrap().unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "new");
    assert_eq!(stored.get_i64("age").unwrap(), 20);
    assert!(stored.get("_id").is_some());
    assert_eq!(stored.len(), 3);
}

#[test]
fn plain_document_update_is_rejected() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_one(doc! {"_id": 1, "v": 1}).unwrap();
    let err = coll
        .update_one(doc! {"_id": 1}, doc! {"v": 2}, None)
        .unwrap_err();
    assert_eq!(err.code(), Some(9));
}

#[test]
fn replacement_preserves_id_and_drops_old_fields() {
    let db = db();
    let coll = db.collection("people");
    coll.insert_one(doc! {"name": "John", "age": 30}).unwrap();
    let original = coll.find_one(Some(doc! {"name": "John"}), None).unwrap().unwrap();
    let id = original.get_object_id("_id").unwrap().clone();

    let result = coll
        .replace_one(doc! {"name": "John"}, doc! {"name": "John Doe", "age": 31}, None)
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let stored = coll.find_one(Some(doc! {"name": "John Doe"}), None).unwrap().unwrap();
    assert_eq!(stored.get_object_id("_id").unwrap(), &id);
    assert_eq!(stored.get_i64("age").unwrap(), 31);
    assert_eq!(stored.len(), 3);
    assert!(coll.find_one(Some(doc! {"age": 30}), None).unwrap().is_none());
}

#[test]
fn replacement_with_operator_keys_is_rejected() {
    let db = db();
    let coll = db.collection("people");
    coll.insert_one(doc! {"_id": 1, "name": "x"}).unwrap();
    let err = coll
        .replace_one(doc! {"_id": 1}, doc! {"$set": {"name": "y"}}, None)
        .unwrap_err();
    assert_eq!(err.code(), Some(9));
}

#[test]
fn replacement_cannot_change_id() {
    let db = db();
    let coll = db.collection("people");
    coll.insert_one(doc! {"_id": 1, "name": "x"}).unwrap();
    let err = coll
        .replace_one(doc! {"_id": 1}, doc! {"_id": 2, "name": "y"}, None)
        .unwrap_err();
    assert_eq!(err.code(), Some(9));
}

#[test]
fn delete_one_and_many() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_many(vec![
        doc! {"_id": 1, "g": "a"},
        doc! {"_id": 2, "g": "a"},
        doc! {"_id": 3, "g": "b"},
    ])
    .unwrap();

    assert_eq!(coll.delete_one(doc! {"g": "a"}).unwrap().deleted_count, 1);
    assert_eq!(coll.delete_many(doc! {"g": "a"}).unwrap().deleted_count, 1);
    assert_eq!(coll.delete_many(doc! {"g": "zz"}).unwrap().deleted_count, 0);
    assert_eq!(coll.count_documents(None, None).unwrap(), 1);
}

#[test]
fn find_one_and_update_images() {
    let db = db();
    let coll = db.collection("counters");
    coll.insert_one(doc! {"_id": "hits", "n": 1}).unwrap();

    // Pre-image by default.
    let before = coll
        .find_one_and_update(doc! {"_id": "hits"}, doc! {"$inc": {"n": 1}}, None)
        .unwrap()
        .unwrap();
    assert_eq!(before.get_i64("n").unwrap(), 1);

    let mut options = FindOneAndUpdateOptions::new();
    options.return_document = ReturnDocument::After;
    let after = coll
        .find_one_and_update(doc! {"_id": "hits"}, doc! {"$inc": {"n": 1}}, Some(options))
        .unwrap()
        .unwrap();
    assert_eq!(after.get_i64("n").unwrap(), 3);

    assert!(coll
        .find_one_and_update(doc! {"_id": "nope"}, doc! {"$inc": {"n": 1}}, None)
        .unwrap()
        .is_none());
}

#[test]
fn find_one_and_update_honours_sort_and_projection() {
    let db = db();
    let coll = db.collection("jobs");
    coll.insert_many(vec![
        doc! {"_id": 1, "priority": 5, "payload": "low"},
        doc! {"_id": 2, "priority": 9, "payload": "high"},
    ])
    .unwrap();

    let mut options = FindOneAndUpdateOptions::new();
    options.sort = Some(doc! {"priority": -1});
    options.projection = Some(doc! {"payload": 1, "_id": 0});
    let picked = coll
        .find_one_and_update(doc! {}, doc! {"$set": {"claimed": true}}, Some(options))
        .unwrap()
        .unwrap();
    assert_eq!(picked, doc! {"payload": "high"});

    let claimed = coll.find_one(Some(doc! {"claimed": true}), None).unwrap().unwrap();
    assert_eq!(claimed.get_i64("_id").unwrap(), 2);
}

#[test]
fn find_one_and_update_upsert_returns_post_image_on_request() {
    let db = db();
    let coll = db.collection("people");
    let mut options = FindOneAndUpdateOptions::new();
    options.upsert = true;
    let pre = coll
        .find_one_and_update(doc! {"name": "ghost"}, doc! {"$set": {"seen": 1}}, Some(options))
        .unwrap();
    assert!(pre.is_none());

    let mut options = FindOneAndUpdateOptions::new();
    options.upsert = true;
    options.return_document = ReturnDocument::After;
    let post = coll
        .find_one_and_update(doc! {"name": "wraith"}, doc! {"$set": {"seen": 1}}, Some(options))
        .unwrap()
        .unwrap();
    assert_eq!(post.get_str("name").unwrap(), "wraith");
    assert_eq!(post.get_i64("seen").unwrap(), 1);
}

#[test]
fn find_one_and_replace_and_delete() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_one(doc! {"_id": 1, "name": "old", "stale": true}).unwrap();

    let before = coll
        .find_one_and_replace(doc! {"_id": 1}, doc! {"name": "new"}, None)
        .unwrap()
        .unwrap();
    assert_eq!(before.get_str("name").unwrap(), "old");
    let stored = coll.find_one(Some(doc! {"_id": 1}), None).unwrap().unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "new");
    assert!(stored.get("stale").is_none());

    let mut options = FindOneAndDeleteOptions::new();
    options.projection = Some(doc! {"name": 1, "_id": 0});
    let removed = coll
        .find_one_and_delete(doc! {"_id": 1}, Some(options))
        .unwrap()
        .unwrap();
    assert_eq!(removed, doc! {"name": "new"});
    assert_eq!(coll.count_documents(None, None).unwrap(), 0);
    assert!(coll.find_one_and_delete(doc! {"_id": 1}, None).unwrap().is_none());
}

#[test]
fn count_documents_with_window_and_estimate() {
    let db = db();
    let coll = db.collection("items");
    for i in 0..5 {
        coll.insert_one(doc! {"_id": i, "even": (i % 2 == 0)}).unwrap();
    }
    assert_eq!(coll.count_documents(None, None).unwrap(), 5);
    assert_eq!(
        coll.count_documents(Some(doc! {"even": true}), None).unwrap(),
        3
    );
    let mut options = mongolite::coll::options::CountOptions::new();
    options.skip = Some(1);
    options.limit = Some(2);
    assert_eq!(coll.count_documents(None, Some(options)).unwrap(), 2);
    assert_eq!(coll.estimated_document_count().unwrap(), 5);

    let empty = db.collection("nothing");
    assert_eq!(empty.estimated_document_count().unwrap(), 0);
}

#[test]
fn distinct_flattens_arrays_and_dedupes() {
    let db = db();
    let coll = db.collection("posts");
    coll.insert_many(vec![
        doc! {"_id": 1, "tags": ["a", "b"], "lang": "en"},
        doc! {"_id": 2, "tags": ["b", "c"], "lang": "en"},
        doc! {"_id": 3, "tags": "d", "lang": "fr"},
    ])
    .unwrap();

    let tags = coll.distinct("tags", None).unwrap();
    let tags: Vec<&str> = tags
        .iter()
        .filter_map(|tag| match *tag {
            Bson::String(ref s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tags, vec!["a", "b", "c", "d"]);

    let english = coll.distinct("tags", Some(doc! {"lang": "en"})).unwrap();
    assert_eq!(english.len(), 3);
}

#[test]
fn namespace_and_rename() {
    let db = db();
    let mut coll = db.collection("draft");
    assert_eq!(coll.name(), "draft");
    assert_eq!(coll.db_name(), "test");
    assert_eq!(coll.namespace(), "test.draft");

    coll.insert_one(doc! {"_id": 1}).unwrap();
    coll.rename("published").unwrap();
    assert_eq!(coll.name(), "published");
    assert_eq!(coll.namespace(), "test.published");
    assert_eq!(coll.count_documents(None, None).unwrap(), 1);

    let names = db.collection_names().unwrap();
    assert!(names.contains(&"published".to_owned()));
    assert!(!names.contains(&"draft".to_owned()));

    // Renaming onto an existing collection fails.
    db.create_collection("occupied").unwrap();
    assert!(coll.rename("occupied").is_err());
}

#[test]
fn collection_admin() {
    let db = db();
    db.create_collection("a").unwrap();
    db.collection("b").insert_one(doc! {"_id": 1}).unwrap();
    assert_eq!(db.collection_names().unwrap(), ["a", "b"]);

    db.collection("b").drop().unwrap();
    assert_eq!(db.collection_names().unwrap(), ["a"]);
    assert_eq!(db.collection("b").count_documents(None, None).unwrap(), 0);

    db.drop_database().unwrap();
    assert!(db.collection_names().unwrap().is_empty());
}

#[test]
fn find_one_honours_skip_and_projection() {
    let db = db();
    let coll = db.collection("items");
    for i in 0..3 {
        coll.insert_one(doc! {"_id": i, "v": i}).unwrap();
    }
    let mut options = FindOptions::new();
    options.skip = Some(1);
    options.projection = Some(doc! {"v": 1, "_id": 0});
    let second = coll.find_one(None, Some(options)).unwrap().unwrap();
    assert_eq!(second, doc! {"v": 1i64});

    let mut options = FindOptions::new();
    options.skip = Some(5);
    assert!(coll.find_one(None, Some(options)).unwrap().is_none());
}

#[test]
fn find_options_drive_the_result_window() {
    let db = db();
    let coll = db.collection("items");
    for i in 0..6 {
        coll.insert_one(doc! {"_id": i, "v": 5 - i}).unwrap();
    }
    let mut options = FindOptions::new();
    options.sort = Some(doc! {"v": 1});
    options.skip = Some(1);
    options.limit = Some(2);
    options.projection = Some(doc! {"v": 1, "_id": 0});
    let docs = coll.find(None, Some(options)).unwrap().to_array().unwrap();
    assert_eq!(docs, vec![doc! {"v": 1i64}, doc! {"v": 2i64}]);
}
