use async_trait::async_trait;

use super::call::RpcCall;
use super::response::RpcResponse;
use crate::errors::Result;

/// Executes one batch of calls against the profile endpoint.
///
/// Implementations own cookies, redirect following and bounded transient retries.
/// A returned error means nothing from this batch may be applied.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &str,
        calls: &[RpcCall],
        screen_name: &str,
    ) -> Result<RpcResponse>;
}
