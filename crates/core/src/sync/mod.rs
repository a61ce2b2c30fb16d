//! Background synchronization of the commit logs and cache with the profile endpoint.

mod coordinator;
mod reachability;
mod scheduler;
mod state;

pub use coordinator::*;
pub use reachability::*;
pub use scheduler::*;
pub use state::*;

#[cfg(test)]
pub(crate) mod tests;
