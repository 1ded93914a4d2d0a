//! The database facade.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::coll::Collection;
use crate::error::{Error, Result};
use crate::store::Store;

/// Cooperative cancellation shared by every operation of a `Database`
/// handle. Operations check the token at each suspension point (before a
/// storage call and at every cursor advance) and abort with the
/// interrupted error when it has been triggered.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Aborts in-flight and future work of every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> CancellationToken {
        CancellationToken::new()
    }
}

/// A handle on one logical database inside the store.
#[derive(Clone)]
pub struct Database {
    store: Store,
    name: String,
    cancel: CancellationToken,
}

impl Database {
    /// Opens (creating if needed) a database file. The logical database
    /// name is the file stem.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database> {
        let name = path
            .as_ref()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("test")
            .to_owned();
        Ok(Database::with_store(Store::open(path)?, name))
    }

    /// Opens a database file under an explicit logical name.
    pub fn open_with_name<P: AsRef<Path>>(path: P, name: &str) -> Result<Database> {
        Ok(Database::with_store(Store::open(path)?, name.to_owned()))
    }

    /// Opens a fresh in-memory database named `test`.
    pub fn open_in_memory() -> Result<Database> {
        Ok(Database::with_store(Store::open_in_memory()?, "test".to_owned()))
    }

    fn with_store(store: Store, name: String) -> Database {
        Database {
            store,
            name,
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cancellation token observed by this handle's operations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Creates a collection representation. The collection is materialised
    /// in the store on first write.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name.to_owned())
    }

    /// Registers a collection eagerly, so it appears in `collection_names`
    /// before any document is inserted.
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        self.checkpoint()?;
        self.store.ensure_collection(&self.name, name)?;
        Ok(self.collection(name))
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.checkpoint()?;
        self.store.collection_names(&self.name)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.checkpoint()?;
        self.store.drop_collection(&self.name, name)
    }

    /// Drops every collection of this database.
    pub fn drop_database(&self) -> Result<()> {
        self.checkpoint()?;
        self.store.drop_database(&self.name)
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }
}
