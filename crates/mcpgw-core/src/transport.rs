//! BackendTransport trait - the seam between orchestration and the network

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::envelope::{JsonRpcRequest, JsonRpcResponse};

/// Delivers envelopes to backends.
///
/// The HTTP implementation lives in `mcpgw-client`; the aggregator and the
/// gateway only see this trait, so tests can substitute scripted backends.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Deliver `request` to `backend` and return its validated reply.
    ///
    /// Never fails: delivery problems come back as error envelopes that
    /// answer `request.id`.
    async fn forward(&self, backend: &BackendConfig, request: &JsonRpcRequest) -> JsonRpcResponse;

    /// Probe the backend's health endpoint
    async fn check_health(&self, backend: &BackendConfig) -> bool;
}
