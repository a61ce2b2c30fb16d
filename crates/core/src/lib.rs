//! Client-side mirror of a server-held visitor profile.
//!
//! Local writes land in a commit log and the property cache right away; a single background
//! worker merges them into a request batch, sends it and applies the response.

pub mod client;
pub mod commit_log;
pub mod errors;
pub mod interactions;
pub mod persistence;
pub mod profile;
pub mod rpc;
pub mod sync;

pub use client::{ClientConfig, ProfileClient, ProfileClientBuilder};
pub use errors::{Error, ErrorKind, Result};
