//! mcpgw-core - Core types for the MCP protocol gateway
//!
//! This crate holds everything the gateway needs that does not touch the
//! network: JSON-RPC envelopes, configuration, the routing decision, the
//! error taxonomy and its translation to wire errors.

pub mod config;
pub mod envelope;
pub mod error;
pub mod error_handler;
pub mod routing;
pub mod transport;

pub use config::{
    AggregationConfig, BackendConfig, ConflictResolution, ForwardingConfig, GatewayConfig,
    RoutingConfig, RoutingStrategy, ServerConfig,
};
pub use envelope::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ResponseOutcome};
pub use error::{
    ConfigError, ConfigResult, EnvelopeError, ErrorKind, GatewayError, GatewayResult,
    RoutingFailure,
};
pub use routing::{RequestContext, RoutingSnapshot, SharedSnapshot};
pub use transport::BackendTransport;
