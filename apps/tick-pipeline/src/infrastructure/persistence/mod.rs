//! Trade Store Adapters
//!
//! - `SqliteTradeStore`: durable store on a SQLite file
//! - `InMemoryTradeStore`: process-local store for tests and ephemeral runs

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryTradeStore;
pub use sqlite::SqliteTradeStore;
