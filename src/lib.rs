//! An embedded MongoDB-compatible document database backed by SQLite.
//!
//! Documents, filters, updates, and aggregation pipelines use the familiar
//! MongoDB shapes; the engine rewrites them into scans over a relational
//! store that keeps each document as an opaque JSON payload keyed by
//! `(collection_id, _id)`.
//!
//! ```no_run
//! use bson::{bson, doc};
//! use mongolite::Database;
//!
//! # fn run() -> mongolite::Result<()> {
//! let db = Database::open("crm.db")?;
//! let people = db.collection("people");
//!
//! people.insert_one(doc! { "name": "Ada", "age": 36 })?;
//! people.update_one(
//!     doc! { "name": "Ada" },
//!     doc! { "$inc": { "age": 1 } },
//!     None,
//! )?;
//!
//! let mut adults = people
//!     .find(Some(doc! { "age": { "$gte": 18 } }), None)?
//!     .sort(doc! { "age": -1 });
//! for person in adults.to_array()? {
//!     println!("{}", person);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod coll;
pub mod cursor;
pub mod db;
pub mod error;
pub mod expr;
pub mod filter;
pub mod json;
pub mod oid;
pub mod path;
pub mod store;
pub mod update;
pub mod value;

pub use crate::aggregate::{build_pipeline, PipelineStage};
pub use crate::coll::Collection;
pub use crate::cursor::Cursor;
pub use crate::db::{CancellationToken, Database};
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::oid::parse_object_id;
