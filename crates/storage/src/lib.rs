//! Durable record stores for the profile mirror.

mod error;
mod fs;
mod sqlite;

pub use error::{Result, StorageError};
pub use fs::FileRecordStore;
pub use sqlite::SqliteRecordStore;
