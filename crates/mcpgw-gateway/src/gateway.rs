//! Gateway - per-request orchestration
//!
//! Discovery calls go to the [`ResponseAggregator`]; everything else is
//! routed to one backend and forwarded. Every failure leaves this module
//! as an error envelope answering the inbound id.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use mcpgw_client::RequestForwarder;
use mcpgw_core::error_handler;
use mcpgw_core::routing::{self, RoutingSnapshot, SharedSnapshot};
use mcpgw_core::{
    BackendTransport, ConfigResult, EnvelopeError, GatewayConfig, GatewayError, JsonRpcRequest,
    JsonRpcResponse, RequestContext,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::aggregator::{is_discovery_method, ResponseAggregator};

/// Health probe result for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub name: String,
    pub url: String,
    pub healthy: bool,
    pub elapsed_ms: u64,
}

/// Gateway over a reloadable set of backends
///
/// Routing rules, backends and aggregation settings live in one snapshot
/// that reload replaces wholesale. A call loads it once at entry, so it sees
/// a single configuration generation from start to finish.
pub struct Gateway {
    snapshot: SharedSnapshot,
    transport: Arc<dyn BackendTransport>,
}

impl Gateway {
    /// Create a gateway delivering through `transport`
    pub fn new(config: &GatewayConfig, transport: Arc<dyn BackendTransport>) -> Self {
        Self {
            snapshot: SharedSnapshot::new(RoutingSnapshot::from_config(config)),
            transport,
        }
    }

    /// Create a gateway delivering over HTTP
    pub fn from_config(config: &GatewayConfig) -> mcpgw_client::Result<Self> {
        let forwarder = RequestForwarder::with_config(&config.forwarding)?;
        Ok(Self::new(config, Arc::new(forwarder)))
    }

    /// Current routing snapshot
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.load()
    }

    /// Publish a new configuration, returning its generation.
    ///
    /// An invalid config is rejected and the current one stays in place.
    /// Forwarding settings are fixed for the gateway's lifetime.
    pub fn reload(&self, config: &GatewayConfig) -> ConfigResult<u64> {
        config.validate()?;

        let previous = self.snapshot.replace(RoutingSnapshot::from_config(config));

        let generation = previous.generation() + 1;
        info!(
            generation,
            backends = config.backends.len(),
            rules = config.routing.rules.len(),
            "Gateway configuration reloaded"
        );
        Ok(generation)
    }

    /// Handle a raw inbound body
    pub async fn handle_bytes(&self, body: &[u8], ctx: &RequestContext) -> JsonRpcResponse {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.handle(value, ctx).await,
            Err(e) => {
                let err = GatewayError::validation(format!("Invalid JSON: {}", e), None);
                debug!(error = %err, "Rejected inbound body");
                error_handler::to_response(&err, Value::Null)
            }
        }
    }

    /// Validate an inbound envelope and handle it
    pub async fn handle(&self, body: Value, ctx: &RequestContext) -> JsonRpcResponse {
        let id = recover_id(&body);
        match JsonRpcRequest::from_value(body) {
            Ok(request) => self.handle_request(&request, ctx).await,
            Err(e) => {
                let err = GatewayError::validation(
                    format!("Invalid request: {}", e),
                    envelope_field(&e),
                );
                debug!(error = %err, "Rejected inbound envelope");
                error_handler::to_response(&err, id)
            }
        }
    }

    /// Dispatch a validated request
    #[instrument(skip_all, fields(method = %request.method, path = ?ctx.path))]
    pub async fn handle_request(
        &self,
        request: &JsonRpcRequest,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let snapshot = self.snapshot.load();

        if is_discovery_method(&request.method) {
            let aggregator =
                ResponseAggregator::new(self.transport.clone(), snapshot.aggregation().clone());
            return aggregator
                .aggregate_response(snapshot.backends(), request)
                .await;
        }

        match routing::resolve(ctx, &snapshot) {
            Ok(backend) => {
                debug!(backend = %backend.name, generation = snapshot.generation(), "Forwarding");
                self.transport.forward(&backend, request).await
            }
            Err(e) => {
                error!(error = %e, "Routing failed");
                error_handler::to_response(&e, request.id.clone())
            }
        }
    }

    /// Probe every backend concurrently
    pub async fn health_report(&self) -> Vec<BackendHealth> {
        let snapshot = self.snapshot.load();
        let probes = snapshot.backends().iter().map(|backend| async move {
            let started = Instant::now();
            let healthy = self.transport.check_health(backend).await;
            BackendHealth {
                name: backend.name.clone(),
                url: backend.url.clone(),
                healthy,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        });
        join_all(probes).await
    }
}

/// Inbound id when it is a usable id value, else null
fn recover_id(body: &Value) -> Value {
    match body.get("id") {
        Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
        _ => Value::Null,
    }
}

fn envelope_field(err: &EnvelopeError) -> Option<&'static str> {
    match err {
        EnvelopeError::VersionMismatch(_) => Some("jsonrpc"),
        EnvelopeError::MissingMethod => Some("method"),
        EnvelopeError::InvalidParams => Some("params"),
        EnvelopeError::InvalidId => Some("id"),
        _ => None,
    }
}
