//! Results of collection-level write operations.

use std::collections::BTreeMap;

use bson::Bson;
use serde_derive::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: Option<Bson>,
}

impl InsertOneResult {
    pub fn new(inserted_id: Option<Bson>) -> InsertOneResult {
        InsertOneResult {
            acknowledged: true,
            inserted_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    pub inserted_count: i64,
    /// Map from the index of the inserted document to its `_id`.
    pub inserted_ids: BTreeMap<usize, Bson>,
}

impl InsertManyResult {
    pub fn new(inserted_ids: BTreeMap<usize, Bson>) -> InsertManyResult {
        InsertManyResult {
            acknowledged: true,
            inserted_count: inserted_ids.len() as i64,
            inserted_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: i64,
    pub modified_count: i64,
    pub upserted_id: Option<Bson>,
    pub upserted_count: i64,
}

impl UpdateResult {
    pub fn new(matched_count: i64, modified_count: i64, upserted_id: Option<Bson>) -> UpdateResult {
        UpdateResult {
            acknowledged: true,
            matched_count,
            modified_count,
            upserted_count: if upserted_id.is_some() { 1 } else { 0 },
            upserted_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: i64,
}

impl DeleteResult {
    pub fn new(deleted_count: i64) -> DeleteResult {
        DeleteResult {
            acknowledged: true,
            deleted_count,
        }
    }
}

/// One failed operation inside a bulk write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteFailure {
    /// Index of the failing operation in the requested batch.
    pub index: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkWriteResult {
    pub acknowledged: bool,
    pub inserted_count: i64,
    pub matched_count: i64,
    pub modified_count: i64,
    pub deleted_count: i64,
    pub upserted_count: i64,
    pub inserted_ids: BTreeMap<usize, Bson>,
    pub upserted_ids: BTreeMap<usize, Bson>,
    /// Populated instead of failing the call, so partial counts stay
    /// observable. An ordered bulk holds at most one entry.
    pub write_errors: Vec<WriteFailure>,
}

impl BulkWriteResult {
    pub fn new() -> BulkWriteResult {
        BulkWriteResult {
            acknowledged: true,
            ..BulkWriteResult::default()
        }
    }
}
