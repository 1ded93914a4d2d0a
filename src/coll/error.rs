//! Write exceptions raised by collection operations.

use std::collections::BTreeMap;
use std::error;
use std::fmt;

use bson::Bson;

use crate::coll::results::WriteFailure;
use crate::error::ErrorCode;

/// A failed write against a single document.
#[derive(Debug, Clone)]
pub struct WriteException {
    pub code: i32,
    pub message: String,
}

impl WriteException {
    pub fn new(code: i32, message: String) -> WriteException {
        WriteException { code, message }
    }

    /// The duplicate-key failure for an `_id` collision, with the message
    /// shape downstream layers pattern-match on.
    pub fn duplicate_key(namespace: &str, id: &Bson) -> WriteException {
        WriteException {
            code: ErrorCode::DuplicateKey.code(),
            message: format!(
                "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                namespace, id
            ),
        }
    }
}

impl fmt::Display for WriteException {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "WriteException({}): {}", self.code, self.message)
    }
}

impl error::Error for WriteException {}

/// One or more failed writes inside a batch operation, along with what did
/// succeed before the failure.
#[derive(Debug, Clone)]
pub struct BulkWriteException {
    pub message: String,
    pub inserted_ids: BTreeMap<usize, Bson>,
    pub write_errors: Vec<WriteFailure>,
}

impl BulkWriteException {
    pub fn new(inserted_ids: BTreeMap<usize, Bson>, write_errors: Vec<WriteFailure>) -> BulkWriteException {
        let message = match write_errors.first() {
            Some(failure) => failure.message.clone(),
            None => "bulk write failed".to_owned(),
        };
        BulkWriteException {
            message,
            inserted_ids,
            write_errors,
        }
    }
}

impl fmt::Display for BulkWriteException {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "BulkWriteException: {} failed operation(s); first: {}",
            self.write_errors.len(),
            self.message
        )
    }
}

impl error::Error for BulkWriteException {}
