//! ResponseAggregator - fans discovery calls out to every backend
//!
//! Each backend is asked for its capability list using a prioritized list
//! of method aliases. All backends are polled concurrently under one
//! overall deadline, and the successful lists are merged in configuration
//! order with the configured conflict resolution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use mcpgw_core::error_handler;
use mcpgw_core::routing;
use mcpgw_core::{
    AggregationConfig, BackendConfig, BackendTransport, ConflictResolution, GatewayError,
    GatewayResult, JsonRpcRequest, JsonRpcResponse,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

/// Discovery method names, in the order they are tried against a backend
pub const DISCOVERY_METHODS: [&str; 3] = ["tools/list", "get_methods", "list_tools"];

/// Whether `method` is a discovery call handled by the aggregator
pub fn is_discovery_method(method: &str) -> bool {
    DISCOVERY_METHODS.contains(&method)
}

/// What one backend contributed to an aggregation round
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendOutcome {
    pub name: String,
    pub success: bool,
    /// Alias that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub elapsed_ms: u64,
}

impl BackendOutcome {
    fn succeeded(name: &str, method: &str, capabilities: Vec<Value>, elapsed: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            method: Some(method.to_string()),
            capabilities: Some(capabilities),
            failure_reason: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn failed(name: &str, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            method: None,
            capabilities: None,
            failure_reason: Some(reason.into()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Round statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_capabilities: usize,
    pub wall_clock_ms: u64,
}

/// Merged discovery answer
#[derive(Debug, Clone)]
pub struct AggregationResult {
    /// Merged capability list
    pub tools: Vec<Value>,
    /// Per-backend outcomes in configuration order
    pub servers: Vec<BackendOutcome>,
    pub stats: AggregationStats,
}

impl AggregationResult {
    /// Names of the merged capabilities, in order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .collect()
    }

    /// Result payload; `servers` and `stats` only when `include_details`
    pub fn into_value(self, include_details: bool) -> Value {
        let mut obj = Map::new();
        obj.insert("tools".to_string(), Value::Array(self.tools));
        if include_details {
            obj.insert("servers".to_string(), json!(self.servers));
            obj.insert("stats".to_string(), json!(self.stats));
        }
        Value::Object(obj)
    }
}

/// Concurrent discovery over a backend set
pub struct ResponseAggregator {
    transport: Arc<dyn BackendTransport>,
    config: AggregationConfig,
}

impl ResponseAggregator {
    pub fn new(transport: Arc<dyn BackendTransport>, config: AggregationConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Run one discovery round and wrap the outcome in an envelope
    /// answering `request.id`
    pub async fn aggregate_response(
        &self,
        backends: &[Arc<BackendConfig>],
        request: &JsonRpcRequest,
    ) -> JsonRpcResponse {
        match self.aggregate(backends, request).await {
            Ok(result) => JsonRpcResponse::success(
                request.id.clone(),
                result.into_value(self.config.include_details),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Discovery aggregation failed");
                error_handler::to_response(&e, request.id.clone())
            }
        }
    }

    /// Poll every backend concurrently and merge their capability lists.
    ///
    /// An empty backend set yields an empty result. Zero successes out of
    /// one or more backends is always an error; any failure is an error
    /// when partial failure is not tolerated.
    #[instrument(skip_all, fields(backends = backends.len(), method = %request.method))]
    pub async fn aggregate(
        &self,
        backends: &[Arc<BackendConfig>],
        request: &JsonRpcRequest,
    ) -> GatewayResult<AggregationResult> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.timeout();

        let mut pending: FuturesUnordered<_> = backends
            .iter()
            .enumerate()
            .map(|(index, backend)| async move {
                (index, self.query_backend(backend, request).await)
            })
            .collect();

        let mut slots: Vec<Option<BackendOutcome>> = (0..backends.len()).map(|_| None).collect();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, outcome))) => slots[index] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.timeout_ms,
                        pending = pending.len(),
                        "Aggregation deadline reached"
                    );
                    break;
                }
            }
        }
        drop(pending);

        let servers: Vec<BackendOutcome> = slots
            .into_iter()
            .zip(backends)
            .map(|(slot, backend)| {
                slot.unwrap_or_else(|| {
                    BackendOutcome::failed(
                        &backend.name,
                        format!("Aggregation timed out after {}ms", self.config.timeout_ms),
                        started.elapsed(),
                    )
                })
            })
            .collect();

        let successful = servers.iter().filter(|o| o.success).count();
        let failed = servers.len() - successful;

        if !servers.is_empty() && successful == 0 {
            return Err(aggregate_failure(
                format!("All {} backends failed discovery", servers.len()),
                &servers,
            ));
        }
        if failed > 0 && !self.config.continue_on_partial_failure {
            return Err(aggregate_failure(
                format!("{} of {} backends failed discovery", failed, servers.len()),
                &servers,
            ));
        }

        let tools = merge_capabilities(&servers, self.config.conflict_resolution);
        let stats = AggregationStats {
            total: servers.len(),
            successful,
            failed,
            total_capabilities: tools.len(),
            wall_clock_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            total = stats.total,
            successful,
            failed,
            capabilities = stats.total_capabilities,
            wall_clock_ms = stats.wall_clock_ms,
            "Discovery aggregated"
        );

        Ok(AggregationResult {
            tools,
            servers,
            stats,
        })
    }

    /// Try each discovery alias until one answers with a result
    async fn query_backend(
        &self,
        backend: &BackendConfig,
        request: &JsonRpcRequest,
    ) -> BackendOutcome {
        let started = Instant::now();
        let mut reasons = Vec::with_capacity(DISCOVERY_METHODS.len());

        for alias in DISCOVERY_METHODS {
            let response = self
                .transport
                .forward(backend, &request.with_method(alias))
                .await;

            if let Some(result) = response.result() {
                let capabilities = extract_capabilities(&backend.name, result);
                debug!(
                    backend = %backend.name,
                    method = alias,
                    count = capabilities.len(),
                    "Backend listed capabilities"
                );
                return BackendOutcome::succeeded(
                    &backend.name,
                    alias,
                    capabilities,
                    started.elapsed(),
                );
            }
            if let Some(error) = response.error() {
                debug!(backend = %backend.name, method = alias, code = error.code, "Discovery alias failed");
                reasons.push(format!("{}: {}", alias, error.message));
            }
        }

        warn!(backend = %backend.name, "Backend failed discovery");
        BackendOutcome::failed(&backend.name, reasons.join("; "), started.elapsed())
    }
}

fn aggregate_failure(message: String, servers: &[BackendOutcome]) -> GatewayError {
    let failures: Vec<Value> = servers
        .iter()
        .filter(|o| !o.success)
        .map(|o| json!({"name": o.name, "reason": o.failure_reason}))
        .collect();
    GatewayError::downstream(message, None, None).with_payload(json!({ "failures": failures }))
}

/// Capability records from a discovery result.
///
/// Accepts `{"tools": [...]}`, `{"methods": [...]}` or a bare array. Entries
/// without a usable string name keep their content under a placeholder name.
fn extract_capabilities(backend: &str, result: &Value) -> Vec<Value> {
    let entries = match result {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj
            .get("tools")
            .or_else(|| obj.get("methods"))
            .and_then(Value::as_array),
        _ => None,
    };
    let Some(entries) = entries else {
        warn!(backend = %backend, "Discovery result has no capability list");
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| normalize_entry(backend, index, entry))
        .collect()
}

fn normalize_entry(backend: &str, index: usize, entry: &Value) -> Value {
    let placeholder = || format!("unknown_{}_{}", backend, index);
    match entry {
        Value::Object(obj) => {
            let mut record = obj.clone();
            let named = matches!(obj.get("name"), Some(Value::String(s)) if !s.is_empty());
            if !named {
                debug!(backend = %backend, index, "Capability without a name");
                record.insert("name".to_string(), Value::from(placeholder()));
            }
            Value::Object(record)
        }
        Value::String(name) if !name.is_empty() => json!({ "name": name }),
        other => json!({ "name": placeholder(), "raw": other }),
    }
}

/// Merge successful outcomes in order, resolving duplicate names
fn merge_capabilities(servers: &[BackendOutcome], strategy: ConflictResolution) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();

    let owned = servers
        .iter()
        .filter(|o| o.success)
        .flat_map(|o| {
            o.capabilities
                .iter()
                .flatten()
                .map(move |capability| (o.name.as_str(), capability))
        });

    for (backend, capability) in owned {
        let name = capability_name(capability).to_string();

        if !taken.contains(&name) {
            taken.insert(name.clone());
            positions.insert(name, merged.len());
            merged.push(capability.clone());
            continue;
        }

        match strategy {
            ConflictResolution::KeepFirst => {
                debug!(backend = %backend, name = %name, "Dropping duplicate capability");
            }
            ConflictResolution::KeepLast => {
                if let Some(&position) = positions.get(&name) {
                    merged[position] = capability.clone();
                }
            }
            ConflictResolution::Prefix => {
                let qualified = routing::prefixed_id(&name, Some(backend));
                let unique = if taken.contains(&qualified) {
                    next_free_suffix(&qualified, &taken)
                } else {
                    qualified
                };
                taken.insert(unique.clone());
                merged.push(renamed(capability, &unique));
            }
            ConflictResolution::Suffix => {
                let unique = next_free_suffix(&name, &taken);
                taken.insert(unique.clone());
                merged.push(renamed(capability, &unique));
            }
        }
    }

    merged
}

fn capability_name(capability: &Value) -> &str {
    capability.get("name").and_then(Value::as_str).unwrap_or_default()
}

/// `name_1`, `name_2`, ... whichever is first unused
fn next_free_suffix(name: &str, taken: &HashSet<String>) -> String {
    (1u64..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn renamed(capability: &Value, name: &str) -> Value {
    let mut record = capability.clone();
    if let Value::Object(obj) = &mut record {
        obj.insert("name".to_string(), Value::from(name));
    }
    record
}
