//! HTTP transport for the profile RPC endpoint.

mod client;
mod error;

pub use client::{RpcClient, RpcClientOptions, SimulatorSession, MAX_FOLLOW_UPS, USER_AGENT};
pub use error::{RetryClass, RpcError};
