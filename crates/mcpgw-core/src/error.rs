//! Error taxonomy for the gateway
//!
//! [`GatewayError`] is the single failure type flowing through routing,
//! forwarding and aggregation. Each variant carries the context its wire
//! translation needs; see [`crate::error_handler`] for the mapping to
//! JSON-RPC error codes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for envelope validation
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why routing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingFailure {
    /// The configured strategy is not one the router understands
    InvalidStrategy,
    /// No rule matched and there is no default backend
    NoRoute,
    /// A rule matched but names a backend absent from the snapshot
    ServerNotFound,
}

impl RoutingFailure {
    /// Stable machine-readable tag
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingFailure::InvalidStrategy => "invalid_strategy",
            RoutingFailure::NoRoute => "no_route",
            RoutingFailure::ServerNotFound => "server_not_found",
        }
    }
}

/// Discriminator of [`GatewayError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Routing,
    Downstream,
    Protocol,
    Validation,
    Timeout,
    RateLimit,
}

impl ErrorKind {
    /// Tag written into the `data.type` field of error envelopes
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Routing => "RoutingError",
            ErrorKind::Downstream => "DownstreamError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::RateLimit => "RateLimitError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while handling a gateway request
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The request could not be mapped to a backend
    #[error("{message}")]
    Routing {
        failure: RoutingFailure,
        message: String,
        /// Inbound path, when prefix routing was used
        path: Option<String>,
        /// Key that was looked up in the rules
        route_key: Option<String>,
        /// Backend a rule pointed at
        backend: Option<String>,
    },

    /// A backend failed to deliver a usable reply
    #[error("{message}")]
    Downstream {
        message: String,
        backend: Option<String>,
        /// HTTP status returned by the backend, if any
        status: Option<u16>,
        /// Upstream body or aggregate details (redacted before emission)
        payload: Option<Value>,
    },

    /// A reply violated the wire protocol
    #[error("{message}")]
    Protocol {
        message: String,
        /// Overrides the default wire code
        code: Option<i64>,
        payload: Option<Value>,
    },

    /// An inbound request was malformed
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A single attempt or an aggregation round ran out of time
    #[error("{message}")]
    Timeout {
        message: String,
        backend: Option<String>,
        timeout_ms: u64,
    },

    /// A backend asked us to slow down
    #[error("{message}")]
    RateLimit {
        message: String,
        backend: Option<String>,
        /// When the backend will accept calls again
        reset_at: DateTime<Utc>,
        /// Rate-limit related response headers
        headers: BTreeMap<String, String>,
    },
}

impl GatewayError {
    /// The strategy in the routing snapshot is unsupported
    pub fn invalid_strategy() -> Self {
        GatewayError::Routing {
            failure: RoutingFailure::InvalidStrategy,
            message: "Invalid routing strategy".to_string(),
            path: None,
            route_key: None,
            backend: None,
        }
    }

    /// Nothing matched and no default backend is configured
    pub fn no_route(path: Option<String>, route_key: Option<String>) -> Self {
        GatewayError::Routing {
            failure: RoutingFailure::NoRoute,
            message: "No route found".to_string(),
            path,
            route_key,
            backend: None,
        }
    }

    /// A rule resolved to a backend the snapshot does not contain
    pub fn server_not_found(backend: &str, route_key: Option<String>) -> Self {
        GatewayError::Routing {
            failure: RoutingFailure::ServerNotFound,
            message: format!("Server not found: {}", backend),
            path: None,
            route_key,
            backend: Some(backend.to_string()),
        }
    }

    /// Generic downstream failure
    pub fn downstream(message: impl Into<String>, backend: Option<&str>, status: Option<u16>) -> Self {
        GatewayError::Downstream {
            message: message.into(),
            backend: backend.map(str::to_string),
            status,
            payload: None,
        }
    }

    /// Protocol violation with the default wire code
    pub fn protocol(message: impl Into<String>) -> Self {
        GatewayError::Protocol {
            message: message.into(),
            code: None,
            payload: None,
        }
    }

    /// Malformed inbound request
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Timed out after `timeout_ms`
    pub fn timeout(backend: Option<&str>, timeout_ms: u64) -> Self {
        let message = match backend {
            Some(b) => format!("Request to {} timed out after {}ms", b, timeout_ms),
            None => format!("Request timed out after {}ms", timeout_ms),
        };
        GatewayError::Timeout {
            message,
            backend: backend.map(str::to_string),
            timeout_ms,
        }
    }

    /// Attach an upstream payload to a downstream or protocol error
    pub fn with_payload(mut self, value: Value) -> Self {
        match &mut self {
            GatewayError::Downstream { payload, .. } | GatewayError::Protocol { payload, .. } => {
                *payload = Some(value);
            }
            _ => {}
        }
        self
    }

    /// Kind discriminator
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Routing { .. } => ErrorKind::Routing,
            GatewayError::Downstream { .. } => ErrorKind::Downstream,
            GatewayError::Protocol { .. } => ErrorKind::Protocol,
            GatewayError::Validation { .. } => ErrorKind::Validation,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::RateLimit { .. } => ErrorKind::RateLimit,
        }
    }

    /// JSON-RPC code this error is reported with
    pub fn code(&self) -> i64 {
        crate::error_handler::error_code(self)
    }

    /// HTTP status the backend answered with, when one was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::Downstream { status, .. } => *status,
            GatewayError::RateLimit { .. } => Some(429),
            _ => None,
        }
    }

    /// Backend this error is attributed to, if any
    pub fn backend(&self) -> Option<&str> {
        match self {
            GatewayError::Routing { backend, .. }
            | GatewayError::Downstream { backend, .. }
            | GatewayError::Timeout { backend, .. }
            | GatewayError::RateLimit { backend, .. } => backend.as_deref(),
            GatewayError::Protocol { .. } | GatewayError::Validation { .. } => None,
        }
    }
}

/// Reasons a JSON value is not a valid envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("expected jsonrpc \"2.0\", found {0}")]
    VersionMismatch(String),

    #[error("request has no method")]
    MissingMethod,

    #[error("params must be an object or an array")]
    InvalidParams,

    #[error("id must be a string, a number or null")]
    InvalidId,

    #[error("response contains neither result nor error")]
    MissingOutcome,

    #[error("response contains both result and error")]
    AmbiguousOutcome,

    #[error("error member is not an object")]
    InvalidErrorObject,

    #[error("error code must be numeric")]
    InvalidErrorCode,

    #[error("error message must be a string")]
    InvalidErrorMessage,

    #[error("response id {found} does not match request id {expected}")]
    IdMismatch { expected: String, found: String },
}

impl From<EnvelopeError> for GatewayError {
    fn from(err: EnvelopeError) -> Self {
        GatewayError::protocol(format!("Invalid response envelope: {}", err))
    }
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no backends configured")]
    NoBackends,

    #[error("duplicate backend name: {0}")]
    DuplicateBackend(String),

    #[error("invalid backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },
}
