use bson::{bson, doc, Bson, Document};
use mongolite::filter::{Filter, FilterEnv};
use mongolite::store::ScanPlan;
use mongolite::Error;

use super::db;

/// Seeds a collection and returns the `_id`s matched by the filter.
fn matching_ids(seed: Vec<Document>, filter: Document) -> Vec<i64> {
    let db = db();
    let coll = db.collection("probe");
    coll.insert_many(seed).unwrap();
    let docs = coll.find(Some(filter), None).unwrap().to_array().unwrap();
    docs.iter().map(|d| d.get_i64("_id").unwrap()).collect()
}

#[test]
fn implicit_equality_and_operators() {
    let seed = vec![
        doc! {"_id": 1, "qty": 5},
        doc! {"_id": 2, "qty": 10},
        doc! {"_id": 3, "qty": 15},
    ];
    assert_eq!(matching_ids(seed.clone(), doc! {"qty": 10}), vec![2]);
    assert_eq!(
        matching_ids(seed.clone(), doc! {"qty": {"$gt": 5, "$lte": 15}}),
        vec![2, 3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"qty": {"$in": [5, 15, 99]}}),
        vec![1, 3]
    );
    assert_eq!(matching_ids(seed, doc! {"qty": {"$ne": 10}}), vec![1, 3]);
}

#[test]
fn dotted_paths_and_array_broadcast() {
    let seed = vec![
        doc! {"_id": 1, "sku": {"size": "M"}},
        doc! {"_id": 2, "variants": [{"size": "S"}, {"size": "L"}]},
        doc! {"_id": 3, "variants": [{"size": "M"}]},
    ];
    assert_eq!(
        matching_ids(seed.clone(), doc! {"sku.size": "M"}),
        vec![1]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"variants.size": "L"}),
        vec![2]
    );
    assert_eq!(
        matching_ids(seed, doc! {"variants.0.size": "S"}),
        vec![2]
    );
}

#[test]
fn elem_match_is_stricter_than_dotted_paths() {
    let seed = vec![
        doc! {"_id": 1, "readings": [{"t": 10, "ok": true}, {"t": 99, "ok": false}]},
        doc! {"_id": 2, "readings": [{"t": 99, "ok": true}]},
    ];
    // Dotted paths may cross elements: document 1 matches through two
    // different readings.
    assert_eq!(
        matching_ids(seed.clone(), doc! {"readings.t": 99, "readings.ok": true}),
        vec![1, 2]
    );
    // $elemMatch pins both conditions to one element.
    assert_eq!(
        matching_ids(
            seed,
            doc! {"readings": {"$elemMatch": {"t": 99, "ok": true}}}
        ),
        vec![2]
    );
}

#[test]
fn null_and_missing_are_distinguished_per_operator() {
    let seed = vec![
        doc! {"_id": 1, "v": (Bson::Null)},
        doc! {"_id": 2, "v": 7},
        doc! {"_id": 3},
    ];
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": (Bson::Null)}),
        vec![1, 3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": {"$eq": (Bson::Null)}}),
        vec![1, 3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": {"$exists": false}}),
        vec![3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": {"$exists": true}}),
        vec![1, 2]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": {"$type": "null"}}),
        vec![1]
    );
    assert_eq!(
        matching_ids(seed, doc! {"v": {"$ne": (Bson::Null)}}),
        vec![2]
    );
}

#[test]
fn type_aliases() {
    let seed = vec![
        doc! {"_id": 1, "v": "s"},
        doc! {"_id": 2, "v": 1},
        doc! {"_id": 3, "v": 1.5},
        doc! {"_id": 4, "v": true},
        doc! {"_id": 5, "v": {"k": 1}},
        doc! {"_id": 6, "v": [1, 2]},
    ];
    assert_eq!(matching_ids(seed.clone(), doc! {"v": {"$type": "string"}}), vec![1]);
    assert_eq!(
        matching_ids(seed.clone(), doc! {"v": {"$type": "number"}}),
        vec![2, 3, 6]
    );
    assert_eq!(matching_ids(seed.clone(), doc! {"v": {"$type": "bool"}}), vec![4]);
    assert_eq!(matching_ids(seed.clone(), doc! {"v": {"$type": "object"}}), vec![5]);
    assert_eq!(matching_ids(seed, doc! {"v": {"$type": "array"}}), vec![6]);
}

#[test]
fn logical_combinators() {
    let seed = vec![
        doc! {"_id": 1, "a": 1, "b": 1},
        doc! {"_id": 2, "a": 1, "b": 2},
        doc! {"_id": 3, "a": 2, "b": 2},
    ];
    assert_eq!(
        matching_ids(seed.clone(), doc! {"$and": [{"a": 1}, {"b": 2}]}),
        vec![2]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"$or": [{"a": 2}, {"b": 1}]}),
        vec![1, 3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"$nor": [{"a": 2}, {"b": 1}]}),
        vec![2]
    );
    assert_eq!(
        matching_ids(seed, doc! {"b": {"$not": {"$gt": 1}}}),
        vec![1]
    );
}

#[test]
fn arrays_match_whole_or_element() {
    let seed = vec![
        doc! {"_id": 1, "tags": ["a", "b"]},
        doc! {"_id": 2, "tags": ["b"]},
        doc! {"_id": 3, "tags": "b"},
    ];
    assert_eq!(matching_ids(seed.clone(), doc! {"tags": "b"}), vec![1, 2, 3]);
    assert_eq!(matching_ids(seed.clone(), doc! {"tags": ["b"]}), vec![2]);
    assert_eq!(
        matching_ids(seed.clone(), doc! {"tags": {"$all": ["a", "b"]}}),
        vec![1]
    );
    assert_eq!(matching_ids(seed.clone(), doc! {"tags": {"$size": 1}}), vec![2]);
    assert_eq!(matching_ids(seed, doc! {"tags": {"$size": 0}}), Vec::<i64>::new());
}

#[test]
fn regex_and_mod_and_expr() {
    let seed = vec![
        doc! {"_id": 1, "name": "Alpha", "n": 8},
        doc! {"_id": 2, "name": "beta", "n": 9},
        doc! {"_id": 3, "name": "alphabet", "n": 12},
    ];
    assert_eq!(
        matching_ids(seed.clone(), doc! {"name": {"$regex": "^alpha", "$options": "i"}}),
        vec![1, 3]
    );
    assert_eq!(
        matching_ids(seed.clone(), doc! {"n": {"$mod": [4, 0]}}),
        vec![1, 3]
    );
    assert_eq!(
        matching_ids(seed, doc! {"$expr": {"$gt": [{"$multiply": ["$n", 2]}, 17]}}),
        vec![2, 3]
    );
}

#[test]
fn no_numeric_string_coercion() {
    let seed = vec![
        doc! {"_id": 1, "v": 1},
        doc! {"_id": 2, "v": "1"},
    ];
    assert_eq!(matching_ids(seed.clone(), doc! {"v": 1}), vec![1]);
    assert_eq!(matching_ids(seed.clone(), doc! {"v": "1"}), vec![2]);
    // Numeric tags cross-compare among themselves.
    assert_eq!(matching_ids(seed, doc! {"v": 1.0}), vec![1]);
}

#[test]
fn query_errors_carry_code_2() {
    let db = db();
    let coll = db.collection("probe");
    coll.insert_one(doc! {"_id": 1}).unwrap();

    let err = coll.find(Some(doc! {"$nope": 1}), None).unwrap_err();
    assert_eq!(err.code(), Some(2));

    let err = coll.find(Some(doc! {"a": {"$almost": 1}}), None).unwrap_err();
    assert_eq!(err.code(), Some(2));

    let err = coll
        .find(Some(doc! {"a": {"$regex": "(unclosed"}}), None)
        .unwrap_err();
    assert_eq!(err.code(), Some(2));

    let err = coll.find(Some(doc! {"$and": []}), None).unwrap_err();
    assert_eq!(err.code(), Some(2));
}

/// Direct evaluation of a compiled filter against one document, without
/// the storage layer.
fn eval(filter: Document, doc: Document) -> bool {
    Filter::parse(&filter)
        .unwrap()
        .matches(&doc, &FilterEnv::new())
        .unwrap()
}

#[test]
fn direct_equality_matches_whole_array_or_element() {
    assert!(eval(doc! {"tags": "b"}, doc! {"tags": ["a", "b", "c"]}));
    assert!(!eval(doc! {"tags": "z"}, doc! {"tags": ["a", "b", "c"]}));
    assert!(eval(doc! {"tags": ["a", "b", "c"]}, doc! {"tags": ["a", "b", "c"]}));
}

#[test]
fn comparisons_are_type_bracketed() {
    assert!(eval(doc! {"a": {"$gt": 2}}, doc! {"a": 3}));
    assert!(eval(doc! {"a": {"$gt": 2}}, doc! {"a": 2.5}));
    assert!(!eval(doc! {"a": {"$gt": 2}}, doc! {"a": "10"}));
    assert!(!eval(doc! {"a": {"$lt": 10}}, doc! {"a": "2"}));
}

#[test]
fn elem_match_with_operator_conditions() {
    let stored = doc! {"scores": [55, 82, 91]};
    assert!(eval(
        doc! {"scores": {"$elemMatch": {"$gt": 80, "$lt": 90}}},
        stored.clone()
    ));
    assert!(!eval(doc! {"scores": {"$elemMatch": {"$gt": 95}}}, stored));
}

#[test]
fn regex_ignores_non_string_targets() {
    assert!(eval(
        doc! {"name": {"$regex": "^mon", "$options": "i"}},
        doc! {"name": "Mongo"}
    ));
    assert!(!eval(doc! {"name": {"$regex": "^Mon"}}, doc! {"name": 5}));
}

#[test]
fn mod_skips_non_numeric_targets() {
    assert!(!eval(doc! {"n": {"$mod": [4, 0]}}, doc! {"n": "12"}));
}

#[test]
fn unknown_operators_are_rejected_at_parse() {
    assert!(matches!(
        Filter::parse(&doc! {"$frobnicate": 1}),
        Err(Error::BadQuery(_))
    ));
    assert!(matches!(
        Filter::parse(&doc! {"a": {"$frobnicate": 1}}),
        Err(Error::BadQuery(_))
    ));
    assert!(matches!(
        Filter::parse(&doc! {"a": {"$regex": "("}}),
        Err(Error::BadQuery(_))
    ));
}

#[test]
fn pushdown_plans() {
    // Only the equality conjunct is pushed, and nothing but an _id
    // equality covers the filter.
    let filter = Filter::parse(&doc! {"name": "x", "age": {"$gt": 3}}).unwrap();
    let plan = ScanPlan::for_filter(&filter);
    assert_eq!(plan.clauses.len(), 1);
    assert!(!plan.covering);

    let filter = Filter::parse(&doc! {"name": "x"}).unwrap();
    let plan = ScanPlan::for_filter(&filter);
    assert_eq!(plan.clauses.len(), 1);
    assert!(!plan.covering);

    let filter = Filter::parse(&doc! {"_id": "x"}).unwrap();
    let plan = ScanPlan::for_filter(&filter);
    assert_eq!(plan.clauses, vec!["id = ?"]);
    assert!(plan.covering);

    let filter = Filter::parse(&doc! {}).unwrap();
    let plan = ScanPlan::for_filter(&filter);
    assert!(plan.clauses.is_empty());
    assert!(plan.covering);
}

#[test]
fn matching_round_trip_property() {
    // Filters that match a document find it after insertion, and filters
    // that do not match exclude it.
    let document = doc! {
        "_id": 1,
        "name": "probe",
        "nested": {"depth": 2},
        "tags": ["x", "y"],
        "score": 7.5
    };
    let matching = vec![
        doc! {},
        doc! {"name": "probe"},
        doc! {"nested.depth": 2},
        doc! {"tags": "y"},
        doc! {"score": {"$gt": 7}},
        doc! {"absent": (Bson::Null)},
    ];
    let excluding = vec![
        doc! {"name": "other"},
        doc! {"nested.depth": {"$gt": 5}},
        doc! {"tags": "z"},
        doc! {"score": {"$lt": 7}},
        doc! {"absent": {"$exists": true}},
    ];
    for filter in matching {
        let db = db();
        let coll = db.collection("probe");
        coll.insert_one(document.clone()).unwrap();
        let found = coll.find(Some(filter.clone()), None).unwrap().to_array().unwrap();
        assert_eq!(found.len(), 1, "filter should match: {}", filter);
    }
    for filter in excluding {
        let db = db();
        let coll = db.collection("probe");
        coll.insert_one(document.clone()).unwrap();
        let found = coll.find(Some(filter.clone()), None).unwrap().to_array().unwrap();
        assert!(found.is_empty(), "filter should exclude: {}", filter);
    }
}
