// Persistence module: append-only SQLite transaction log
#[cfg(test)]
pub(crate) mod memory;
pub mod repository;
pub mod schema;
pub mod sqlite;

pub use repository::TransactionStore;
pub use sqlite::SqliteStore;
