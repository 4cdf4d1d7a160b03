//! JSON-RPC 2.0 envelopes exchanged with clients and backends
//!
//! Outbound responses are built from [`ResponseOutcome`], which makes the
//! "exactly one of `result` / `error`" rule a property of the type.
//! Inbound data (client requests, backend replies) goes through the
//! validating constructors in this module before anything else touches it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EnvelopeError, EnvelopeResult};

/// Protocol version marker carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist / no route for it
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i64 = -32603;
/// Implementation-defined server error (used for rate limiting)
pub const SERVER_ERROR: i64 = -32000;

/// A request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"` once validated
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method parameters (object or array)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Opaque correlation id, echoed unchanged in the response
    #[serde(default)]
    pub id: Value,
}

impl JsonRpcRequest {
    /// Create a request envelope
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Copy of this request under a different method name.
    ///
    /// Params and id are kept so the reply still correlates with the
    /// original call.
    pub fn with_method(&self, method: &str) -> Self {
        Self {
            jsonrpc: self.jsonrpc.clone(),
            method: method.to_string(),
            params: self.params.clone(),
            id: self.id.clone(),
        }
    }

    /// Validate an inbound JSON value as a request envelope
    pub fn from_value(value: Value) -> EnvelopeResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        check_version(&obj)?;

        let id = obj.remove("id").unwrap_or(Value::Null);
        if !matches!(id, Value::Null | Value::String(_) | Value::Number(_)) {
            return Err(EnvelopeError::InvalidId);
        }

        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.trim().is_empty() => m,
            _ => return Err(EnvelopeError::MissingMethod),
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => return Err(EnvelopeError::InvalidParams),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
            id,
        })
    }
}

/// Error object carried in an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i64,
    /// Short description
    pub message: String,
    /// Additional diagnostic information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach diagnostic data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The single outcome a response carries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    /// Successful call
    Result(Value),
    /// Failed call
    Error(JsonRpcError),
}

/// A response envelope
///
/// Serializes to `{"jsonrpc", "id", "result"}` or `{"jsonrpc", "id", "error"}`.
/// Deserialization runs the same validation as [`JsonRpcResponse::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct JsonRpcResponse {
    /// Protocol version
    pub jsonrpc: String,
    /// Id of the request this answers
    pub id: Value,
    /// Result or error
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl JsonRpcResponse {
    /// Successful response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: ResponseOutcome::Result(result),
        }
    }

    /// Error response
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Validate a backend reply.
    ///
    /// The reply must declare version `"2.0"` and carry exactly one of
    /// `result` / `error`; an error object needs a numeric `code` and a
    /// string `message`.
    pub fn from_value(value: Value) -> EnvelopeResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        check_version(&obj)?;

        let id = obj.remove("id").unwrap_or(Value::Null);
        let result = obj.remove("result");
        let error = obj.remove("error");

        let outcome = match (result, error) {
            (Some(result), None) => ResponseOutcome::Result(result),
            (None, Some(error)) => ResponseOutcome::Error(parse_error_object(error)?),
            (Some(_), Some(_)) => return Err(EnvelopeError::AmbiguousOutcome),
            (None, None) => return Err(EnvelopeError::MissingOutcome),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome,
        })
    }

    /// Check the reply correlates with `expected`.
    ///
    /// A `null` id is stamped with the expected one; any other mismatch is
    /// a protocol violation.
    pub fn correlate(mut self, expected: &Value) -> EnvelopeResult<Self> {
        if self.id.is_null() {
            self.id = expected.clone();
        } else if &self.id != expected {
            return Err(EnvelopeError::IdMismatch {
                expected: expected.to_string(),
                found: self.id.to_string(),
            });
        }
        Ok(self)
    }

    /// Whether this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    /// The result payload, if successful
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ResponseOutcome::Result(v) => Some(v),
            ResponseOutcome::Error(_) => None,
        }
    }

    /// The error object, if failed
    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.outcome {
            ResponseOutcome::Result(_) => None,
            ResponseOutcome::Error(e) => Some(e),
        }
    }

    /// Convert into a JSON value
    pub fn into_value(self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::String(self.jsonrpc));
        obj.insert("id".to_string(), self.id);
        match self.outcome {
            ResponseOutcome::Result(result) => {
                obj.insert("result".to_string(), result);
            }
            ResponseOutcome::Error(error) => {
                let mut err = Map::new();
                err.insert("code".to_string(), Value::from(error.code));
                err.insert("message".to_string(), Value::String(error.message));
                if let Some(data) = error.data {
                    err.insert("data".to_string(), data);
                }
                obj.insert("error".to_string(), Value::Object(err));
            }
        }
        Value::Object(obj)
    }
}

impl TryFrom<Value> for JsonRpcResponse {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn check_version(obj: &Map<String, Value>) -> EnvelopeResult<()> {
    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => Ok(()),
        Some(other) => Err(EnvelopeError::VersionMismatch(other.to_string())),
        None => Err(EnvelopeError::VersionMismatch("nothing".to_string())),
    }
}

fn parse_error_object(error: Value) -> EnvelopeResult<JsonRpcError> {
    let Value::Object(mut obj) = error else {
        return Err(EnvelopeError::InvalidErrorObject);
    };

    let code = match obj.get("code") {
        Some(Value::Number(n)) => n.as_i64().ok_or(EnvelopeError::InvalidErrorCode)?,
        _ => return Err(EnvelopeError::InvalidErrorCode),
    };

    let message = match obj.remove("message") {
        Some(Value::String(m)) => m,
        _ => return Err(EnvelopeError::InvalidErrorMessage),
    };

    Ok(JsonRpcError {
        code,
        message,
        data: obj.remove("data"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip_keeps_id() {
        let req = JsonRpcRequest::from_value(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "search"},
            "id": "abc-1"
        }))
        .unwrap();
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.id, json!("abc-1"));

        let alias = req.with_method("get_methods");
        assert_eq!(alias.id, req.id);
        assert_eq!(alias.params, req.params);
    }

    #[test]
    fn request_rejects_wrong_version() {
        let err = JsonRpcRequest::from_value(json!({"jsonrpc": "1.0", "method": "x", "id": 1}))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::VersionMismatch(_)));
    }

    #[test]
    fn request_rejects_missing_method() {
        let err = JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingMethod));
    }

    #[test]
    fn request_rejects_scalar_params() {
        let err =
            JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "x", "params": 5}))
                .unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidParams));
    }

    #[test]
    fn response_requires_exactly_one_outcome() {
        let both = json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}});
        assert!(matches!(
            JsonRpcResponse::from_value(both),
            Err(EnvelopeError::AmbiguousOutcome)
        ));

        let neither = json!({"jsonrpc": "2.0", "id": 1});
        assert!(matches!(
            JsonRpcResponse::from_value(neither),
            Err(EnvelopeError::MissingOutcome)
        ));
    }

    #[test]
    fn response_error_needs_numeric_code_and_string_message() {
        let bad_code = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": "oops", "message": "x"}});
        assert!(matches!(
            JsonRpcResponse::from_value(bad_code),
            Err(EnvelopeError::InvalidErrorCode)
        ));

        let fractional = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 1.5, "message": "x"}});
        assert!(matches!(
            JsonRpcResponse::from_value(fractional),
            Err(EnvelopeError::InvalidErrorCode)
        ));

        let bad_msg = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -1, "message": 7}});
        assert!(matches!(
            JsonRpcResponse::from_value(bad_msg),
            Err(EnvelopeError::InvalidErrorMessage)
        ));
    }

    #[test]
    fn response_serializes_flat() {
        let ok = JsonRpcResponse::success(json!(7), json!({"tools": []}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "result": {"tools": []}})
        );
        assert_eq!(serde_json::to_value(&ok).unwrap(), ok.clone().into_value());

        let err = JsonRpcResponse::failure(json!(7), JsonRpcError::new(INTERNAL_ERROR, "boom"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "error": {"code": -32603, "message": "boom"}})
        );
    }

    #[test]
    fn response_deserialize_validates() {
        let parsed: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":[1,2]}"#).unwrap();
        assert_eq!(parsed.result(), Some(&json!([1, 2])));

        let invalid = serde_json::from_str::<JsonRpcResponse>(r#"{"jsonrpc":"2.0","id":3}"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn correlate_stamps_null_id_and_rejects_mismatch() {
        let resp = JsonRpcResponse::success(Value::Null, json!(1));
        let stamped = resp.correlate(&json!("req-9")).unwrap();
        assert_eq!(stamped.id, json!("req-9"));

        let other = JsonRpcResponse::success(json!("req-1"), json!(1));
        assert!(matches!(
            other.correlate(&json!("req-9")),
            Err(EnvelopeError::IdMismatch { .. })
        ));
    }
}
