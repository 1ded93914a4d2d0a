mod bulk;
mod crud;
mod errors;
mod filters;
mod identifiers;
mod paths;

use mongolite::Database;

/// A fresh in-memory database per test.
pub fn db() -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::open_in_memory().unwrap()
}
