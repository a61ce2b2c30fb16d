//! Public entry point: configuration and the [`ProfileClient`] facade.

mod config;
mod facade;

pub use config::*;
pub use facade::{ProfileClient, ProfileClientBuilder};
