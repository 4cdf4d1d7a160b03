//! RequestForwarder - delivers envelopes to one backend with bounded retries

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcpgw_core::error_handler;
use mcpgw_core::{
    BackendConfig, BackendTransport, ForwardingConfig, GatewayError, JsonRpcRequest,
    JsonRpcResponse,
};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::error::Result;

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Retry-After assumed when a 429 reply carries no usable header
const DEFAULT_RETRY_AFTER_SECS: i64 = 60;
/// Upper bound on how much of a non-JSON body is embedded into errors
const MAX_BODY_EXCERPT: usize = 512;

/// Forwards JSON-RPC envelopes over HTTP.
///
/// Each call makes up to `max_retries + 1` attempts against one backend.
/// Network failures, attempt timeouts and 5xx replies are retried with
/// exponential backoff; 4xx replies and malformed envelopes are final.
/// Every outcome is an envelope answering the original request id.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    client: Client,
    base_delay: Duration,
}

impl RequestForwarder {
    /// Forwarder with the default 1s backoff base
    pub fn new() -> Result<Self> {
        Self::with_config(&ForwardingConfig::default())
    }

    /// Forwarder configured from the `[forwarding]` section
    pub fn with_config(config: &ForwardingConfig) -> Result<Self> {
        Self::with_base_delay(config.base_delay())
    }

    /// Forwarder with an explicit backoff base
    pub fn with_base_delay(base_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { client, base_delay })
    }

    /// Backoff base
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Deliver `request` to `backend`, retrying transient failures.
    #[instrument(skip_all, fields(backend = %backend.name, method = %request.method))]
    pub async fn forward(&self, backend: &BackendConfig, request: &JsonRpcRequest) -> JsonRpcResponse {
        let started = Instant::now();
        let max_attempts = backend.max_retries.saturating_add(1);
        let mut attempts = 0u32;

        let last_error = loop {
            attempts += 1;
            match self.attempt(backend, request).await {
                Ok(response) => {
                    debug!(
                        attempt = attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        is_error = response.is_error(),
                        "Backend replied"
                    );
                    return response;
                }
                Err(err) => {
                    if !error_handler::is_retryable(&err) {
                        debug!(attempt = attempts, error = %err, "Non-retryable failure");
                        break err;
                    }
                    if attempts >= max_attempts {
                        break err;
                    }
                    let delay = error_handler::retry_delay(attempts, self.base_delay);
                    warn!(
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Forward attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let elapsed = started.elapsed();
        warn!(
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            error = %last_error,
            "Forwarding failed"
        );
        failure_envelope(backend, request, &last_error, attempts, elapsed)
    }

    /// One HTTP round trip, validated
    async fn attempt(
        &self,
        backend: &BackendConfig,
        request: &JsonRpcRequest,
    ) -> std::result::Result<JsonRpcResponse, GatewayError> {
        let response = self
            .client
            .post(&backend.url)
            .timeout(backend.timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(backend, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limit_error(backend, response.headers()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::downstream(
                format!("HTTP {}", status.as_u16()),
                Some(&backend.name),
                Some(status.as_u16()),
            )
            .with_payload(body_payload(&body)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(backend, e))?;
        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::protocol(format!("Backend returned invalid JSON: {}", e))
                .with_payload(body_payload(&String::from_utf8_lossy(&body)))
        })?;

        let envelope = JsonRpcResponse::from_value(value)?;
        Ok(envelope.correlate(&request.id)?)
    }

    /// GET `url + health_path`; healthy iff 2xx.
    #[instrument(skip_all, fields(backend = %backend.name))]
    pub async fn check_health(&self, backend: &BackendConfig) -> bool {
        match self
            .client
            .get(backend.health_url())
            .timeout(backend.timeout())
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(status = response.status().as_u16(), healthy, "Health probe");
                healthy
            }
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl BackendTransport for RequestForwarder {
    async fn forward(&self, backend: &BackendConfig, request: &JsonRpcRequest) -> JsonRpcResponse {
        RequestForwarder::forward(self, backend, request).await
    }

    async fn check_health(&self, backend: &BackendConfig) -> bool {
        RequestForwarder::check_health(self, backend).await
    }
}

fn transport_error(backend: &BackendConfig, e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(Some(&backend.name), backend.timeout_ms)
    } else {
        GatewayError::downstream(
            format!("Connection failed: {}", e),
            Some(&backend.name),
            None,
        )
    }
}

fn rate_limit_error(backend: &BackendConfig, headers: &HeaderMap) -> GatewayError {
    let now = Utc::now();
    let reset_at = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, now))
        .unwrap_or_else(|| now + chrono::Duration::seconds(DEFAULT_RETRY_AFTER_SECS));

    let limit_headers: BTreeMap<String, String> = headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name == "retry-after" || name.starts_with("x-ratelimit")
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    GatewayError::RateLimit {
        message: format!("Backend {} is rate limiting requests", backend.name),
        backend: Some(backend.name.clone()),
        reset_at,
        headers: limit_headers,
    }
}

/// Retry-After as delay-seconds or an HTTP-date; past dates clamp to `now`
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u32>() {
        return Some(now + chrono::Duration::seconds(i64::from(secs)));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc).max(now))
}

/// Body of a failed reply as JSON when possible, else a truncated string
fn body_payload(body: &str) -> Value {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(_) => {
            let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
            Value::String(excerpt)
        }
    }
}

fn failure_envelope(
    backend: &BackendConfig,
    request: &JsonRpcRequest,
    error: &GatewayError,
    attempts: u32,
    elapsed: Duration,
) -> JsonRpcResponse {
    let mut extra = Map::new();
    extra.insert("address".to_string(), Value::from(backend.url.as_str()));
    extra.insert("attempts".to_string(), Value::from(attempts));
    extra.insert(
        "elapsedMs".to_string(),
        Value::from(elapsed.as_millis() as u64),
    );

    let mut object = error_handler::to_error_object_with(error, extra);
    object.message = format!("Failed to forward request to {}: {}", backend.url, error);
    JsonRpcResponse::failure(request.id.clone(), object)
}
