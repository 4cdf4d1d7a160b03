//! mcpgw-gateway - Federated JSON-RPC gateway over several MCP backends
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          MCP Gateway                             │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                        Gateway                            │   │
//! │  │  - Validates inbound envelopes                            │   │
//! │  │  - Routes calls by path prefix or x-target-mcp header     │   │
//! │  │  - Sends discovery calls to the aggregator                │   │
//! │  └───────────────┬──────────────────────────┬───────────────┘   │
//! │                  │                          │                   │
//! │                  ▼                          ▼                   │
//! │  ┌───────────────────────────┐  ┌───────────────────────────┐   │
//! │  │ RequestForwarder          │  │ ResponseAggregator        │   │
//! │  │ (one backend, retries)    │  │ (all backends, merged)    │   │
//! │  └───────────────────────────┘  └───────────────────────────┘   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcpgw_core::{GatewayConfig, RequestContext};
//! use mcpgw_gateway::Gateway;
//!
//! let config = GatewayConfig::load("gateway.toml")?;
//! let gateway = Gateway::from_config(&config)?;
//!
//! let ctx = RequestContext::new().with_path("/github/rpc");
//! let reply = gateway
//!     .handle(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), &ctx)
//!     .await;
//! ```

mod aggregator;
mod gateway;

pub use aggregator::{
    is_discovery_method, AggregationResult, AggregationStats, BackendOutcome, ResponseAggregator,
    DISCOVERY_METHODS,
};
pub use gateway::{BackendHealth, Gateway};

// Re-export core types for convenience
pub use mcpgw_core::{BackendTransport, GatewayConfig, JsonRpcResponse, RequestContext};
