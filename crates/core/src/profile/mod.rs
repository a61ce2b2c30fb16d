//! Profile properties: data model, fingerprint and the local read cache.

mod cache;
mod hash;
mod model;

pub use cache::*;
pub use hash::{fingerprint, property_hash};
pub use model::*;
