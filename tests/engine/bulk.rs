use bson::{bson, doc};
use mongolite::coll::options::{BulkWriteOptions, WriteModel};

use super::db;

#[test]
fn ordered_bulk_halts_on_duplicate_key() {
    let db = db();
    let coll = db.collection("items");
    let result = coll
        .bulk_write(
            vec![
                WriteModel::InsertOne {
                    document: doc! {"_id": "x", "v": 1},
                },
                WriteModel::InsertOne {
                    document: doc! {"_id": "x", "v": 2},
                },
                WriteModel::InsertOne {
                    document: doc! {"_id": "y", "v": 3},
                },
            ],
            None,
        )
        .unwrap();

    assert_eq!(result.inserted_count, 1);
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.write_errors[0].index, 1);
    assert_eq!(result.write_errors[0].code, 11000);

    // The third operation never ran.
    assert_eq!(coll.count_documents(None, None).unwrap(), 1);
    let stored = coll.find_one(Some(doc! {"_id": "x"}), None).unwrap().unwrap();
    assert_eq!(stored.get_i64("v").unwrap(), 1);
}

#[test]
fn unordered_bulk_attempts_every_operation() {
    let db = db();
    let coll = db.collection("items");
    let mut options = BulkWriteOptions::new();
    options.ordered = Some(false);
    let result = coll
        .bulk_write(
            vec![
                WriteModel::InsertOne {
                    document: doc! {"_id": "x"},
                },
                WriteModel::InsertOne {
                    document: doc! {"_id": "x"},
                },
                WriteModel::InsertOne {
                    document: doc! {"_id": "y"},
                },
            ],
            Some(options),
        )
        .unwrap();

    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.write_errors[0].index, 1);
    assert_eq!(coll.count_documents(None, None).unwrap(), 2);
}

#[test]
fn mixed_bulk_reports_aggregate_counts() {
    let db = db();
    let coll = db.collection("items");
    coll.insert_many(vec![
        doc! {"_id": 1, "g": "a", "v": 1},
        doc! {"_id": 2, "g": "a", "v": 2},
        doc! {"_id": 3, "g": "b", "v": 3},
    ])
    .unwrap();

    let result = coll
        .bulk_write(
            vec![
                WriteModel::InsertOne {
                    document: doc! {"_id": 4, "g": "c", "v": 4},
                },
                WriteModel::UpdateMany {
                    filter: doc! {"g": "a"},
                    update: doc! {"$inc": {"v": 10}},
                    upsert: false,
                },
                WriteModel::UpdateOne {
                    filter: doc! {"g": "zz"},
                    update: doc! {"$set": {"v": 0}},
                    upsert: true,
                },
                WriteModel::ReplaceOne {
                    filter: doc! {"_id": 3},
                    replacement: doc! {"g": "b", "v": 30},
                    upsert: false,
                },
                WriteModel::DeleteOne {
                    filter: doc! {"g": "a"},
                },
            ],
            None,
        )
        .unwrap();

    assert!(result.write_errors.is_empty());
    assert_eq!(result.inserted_count, 1);
    assert_eq!(result.matched_count, 3);
    assert_eq!(result.modified_count, 3);
    assert_eq!(result.upserted_count, 1);
    assert_eq!(result.deleted_count, 1);
    assert!(result.upserted_ids.contains_key(&2));
    assert_eq!(result.inserted_ids[&0], bson::Bson::I32(4));
}
