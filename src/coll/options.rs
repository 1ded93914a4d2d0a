//! Options for collection-level operations.

use bson::{Bson, Document};

/// Which image of the document a find-and-modify operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

impl Default for ReturnDocument {
    fn default() -> ReturnDocument {
        ReturnDocument::Before
    }
}

/// Options for `find` and `find_one`. Chained cursor calls win over the
/// corresponding option on conflict.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub batch_size: Option<i32>,
}

impl FindOptions {
    pub fn new() -> FindOptions {
        FindOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn new() -> UpdateOptions {
        UpdateOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    pub upsert: bool,
}

impl ReplaceOptions {
    pub fn new() -> ReplaceOptions {
        ReplaceOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

impl FindOneAndUpdateOptions {
    pub fn new() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOneAndReplaceOptions {
    pub return_document: ReturnDocument,
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

impl FindOneAndReplaceOptions {
    pub fn new() -> FindOneAndReplaceOptions {
        FindOneAndReplaceOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOneAndDeleteOptions {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

impl FindOneAndDeleteOptions {
    pub fn new() -> FindOneAndDeleteOptions {
        FindOneAndDeleteOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl CountOptions {
    pub fn new() -> CountOptions {
        CountOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub batch_size: Option<i32>,
    /// Upper bound on the number of documents a blocking stage may buffer;
    /// a pipeline that exceeds it fails instead of growing without bound.
    pub max_buffered: Option<usize>,
}

impl AggregateOptions {
    pub fn new() -> AggregateOptions {
        AggregateOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BulkWriteOptions {
    /// Ordered bulks stop at the first failing operation; unordered bulks
    /// attempt every operation. Defaults to ordered.
    pub ordered: Option<bool>,
}

impl BulkWriteOptions {
    pub fn new() -> BulkWriteOptions {
        BulkWriteOptions::default()
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// One operation of a `bulk_write` batch.
#[derive(Debug, Clone)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// The description of an index over a collection.
#[derive(Debug, Clone)]
pub struct IndexModel {
    pub keys: Document,
    pub options: IndexOptions,
}

impl IndexModel {
    pub fn new(keys: Document) -> IndexModel {
        IndexModel {
            keys,
            options: IndexOptions::new(),
        }
    }

    pub fn with_options(keys: Document, options: IndexOptions) -> IndexModel {
        IndexModel { keys, options }
    }

    /// The index name: explicit, or derived from the keys the way the
    /// server derives it (`field_1_other_-1`).
    pub fn name(&self) -> String {
        match self.options.name {
            Some(ref name) => name.clone(),
            None => {
                let parts: Vec<String> = self
                    .keys
                    .iter()
                    .map(|(field, direction)| {
                        let rendered = match *direction {
                            Bson::I32(d) => d.to_string(),
                            Bson::I64(d) => d.to_string(),
                            Bson::FloatingPoint(d) => (d as i64).to_string(),
                            ref other => other.to_string(),
                        };
                        format!("{}_{}", field, rendered)
                    })
                    .collect();
                parts.join("_")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    pub fn new() -> IndexOptions {
        IndexOptions::default()
    }
}
