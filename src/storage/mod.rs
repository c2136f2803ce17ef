//! SQLite persistence
//!
//! [`SqliteStorage`] keeps the ledger in one database file. Connections come
//! from an r2d2 pool configured for WAL mode with foreign keys enforced, and
//! the schema is created by embedded migrations when the store is opened.

mod migrations;
mod pool;
mod sqlite;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool};
pub use sqlite::SqliteStorage;
