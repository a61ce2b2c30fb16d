//! Durable storage of the commit logs, cache, profile id and labels.

mod records;
mod store;

pub use records::*;
pub use store::{MemoryStore, PersistenceStore};
