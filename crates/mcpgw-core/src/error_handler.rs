//! Translation of [`GatewayError`] into protocol-compliant error envelopes,
//! plus the retry policy shared with the request forwarder.
//!
//! Code mapping:
//!
//! | kind       | code                                        |
//! |------------|---------------------------------------------|
//! | Routing    | -32602 invalid strategy, -32601 otherwise   |
//! | Downstream | -32602 on backend 4xx, -32603 otherwise     |
//! | Protocol   | -32603 unless the error carries an override |
//! | Validation | -32600                                      |
//! | Timeout    | -32603                                      |
//! | RateLimit  | -32000                                      |
//!
//! Every error object carries `data.type`, `data.timestamp` and the
//! kind-specific context. Upstream payloads are redacted before they are
//! embedded.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::envelope::{
    JsonRpcError, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, SERVER_ERROR,
};
use crate::error::{GatewayError, RoutingFailure};

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Upper bound for a single backoff delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Key fragments that mark a value as sensitive (matched case-insensitively)
const SENSITIVE_KEY_PATTERNS: [&str; 6] = ["password", "token", "key", "secret", "auth", "credential"];

/// Wire code for an error
pub fn error_code(error: &GatewayError) -> i64 {
    match error {
        GatewayError::Routing { failure, .. } => match failure {
            RoutingFailure::InvalidStrategy => INVALID_PARAMS,
            RoutingFailure::NoRoute | RoutingFailure::ServerNotFound => METHOD_NOT_FOUND,
        },
        GatewayError::Downstream { status, .. } => match status {
            Some(s) if (400..500).contains(s) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        },
        GatewayError::Protocol { code, .. } => code.unwrap_or(INTERNAL_ERROR),
        GatewayError::Validation { .. } => INVALID_REQUEST,
        GatewayError::Timeout { .. } => INTERNAL_ERROR,
        GatewayError::RateLimit { .. } => SERVER_ERROR,
    }
}

/// Seconds until a rate-limited backend accepts calls again, rounded up
pub fn retry_after_secs(error: &GatewayError) -> Option<u64> {
    let GatewayError::RateLimit { reset_at, .. } = error else {
        return None;
    };
    let remaining_ms = (*reset_at - Utc::now()).num_milliseconds().max(0) as u64;
    Some(remaining_ms.div_ceil(1000))
}

/// Build the error object for `error`
pub fn to_error_object(error: &GatewayError) -> JsonRpcError {
    to_error_object_with(error, Map::new())
}

/// Build the error object for `error`, merging `extra` into its data
pub fn to_error_object_with(error: &GatewayError, extra: Map<String, Value>) -> JsonRpcError {
    let mut data = Map::new();
    data.insert("type".to_string(), Value::from(error.kind().as_str()));
    data.insert(
        "timestamp".to_string(),
        Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    match error {
        GatewayError::Routing {
            failure,
            path,
            route_key,
            backend,
            ..
        } => {
            data.insert("reason".to_string(), Value::from(failure.as_str()));
            insert_opt(&mut data, "path", path.clone().map(Value::from));
            insert_opt(&mut data, "routeKey", route_key.clone().map(Value::from));
            insert_opt(&mut data, "backend", backend.clone().map(Value::from));
        }
        GatewayError::Downstream {
            backend,
            status,
            payload,
            ..
        } => {
            insert_opt(&mut data, "backend", backend.clone().map(Value::from));
            insert_opt(&mut data, "statusCode", status.map(Value::from));
            insert_opt(&mut data, "upstream", payload.as_ref().map(redact));
        }
        GatewayError::Protocol { payload, .. } => {
            insert_opt(&mut data, "upstream", payload.as_ref().map(redact));
        }
        GatewayError::Validation { field, .. } => {
            insert_opt(&mut data, "field", field.clone().map(Value::from));
        }
        GatewayError::Timeout {
            backend, timeout_ms, ..
        } => {
            insert_opt(&mut data, "backend", backend.clone().map(Value::from));
            data.insert("timeoutMs".to_string(), Value::from(*timeout_ms));
        }
        GatewayError::RateLimit {
            backend, headers, ..
        } => {
            insert_opt(&mut data, "backend", backend.clone().map(Value::from));
            data.insert(
                "retryAfter".to_string(),
                Value::from(retry_after_secs(error).unwrap_or(0)),
            );
            if !headers.is_empty() {
                let headers: Map<String, Value> = headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect();
                data.insert("headers".to_string(), redact(&Value::Object(headers)));
            }
        }
    }

    for (k, v) in extra {
        data.insert(k, v);
    }

    JsonRpcError::new(error_code(error), error.to_string()).with_data(Value::Object(data))
}

/// Full error envelope answering request `id`
pub fn to_response(error: &GatewayError, id: Value) -> JsonRpcResponse {
    tracing::debug!(kind = %error.kind(), code = error_code(error), %error, "Translating error");
    JsonRpcResponse::failure(id, to_error_object(error))
}

/// Full error envelope with extra diagnostic data
pub fn to_response_with(error: &GatewayError, id: Value, extra: Map<String, Value>) -> JsonRpcResponse {
    JsonRpcResponse::failure(id, to_error_object_with(error, extra))
}

/// Whether a failed attempt may be retried.
///
/// Network failures (downstream without status), 5xx replies and attempt
/// timeouts are transient. 4xx replies, rate limiting and protocol
/// violations are authoritative.
pub fn is_retryable(error: &GatewayError) -> bool {
    match error {
        GatewayError::Downstream { status, .. } => match status {
            None => true,
            Some(s) => *s >= 500,
        },
        GatewayError::Timeout { .. } => true,
        GatewayError::Routing { .. }
        | GatewayError::Protocol { .. }
        | GatewayError::Validation { .. }
        | GatewayError::RateLimit { .. } => false,
    }
}

/// Backoff before the attempt following `attempt` (1-based):
/// `min(base * 2^(attempt-1), 30s)`
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Copy of `value` with every sensitive key's value replaced by [`REDACTED`].
///
/// Recurses through objects and arrays; arrays stay arrays and primitives
/// are returned unchanged.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), Value::from(REDACTED))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_PATTERNS.iter().any(|p| lower.contains(p))
}

fn insert_opt(data: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        data.insert(key.to_string(), v);
    }
}
