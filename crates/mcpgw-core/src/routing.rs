//! Request routing.
//!
//! [`resolve`] maps a request context onto a backend using one
//! [`RoutingSnapshot`]. Snapshots are immutable; a reload builds a new one
//! and publishes it through [`SharedSnapshot`], so callers that already hold
//! an `Arc` keep a consistent (rules, backends) pair for the whole call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{
    AggregationConfig, BackendConfig, GatewayConfig, RoutingConfig, RoutingStrategy,
};
use crate::error::{GatewayError, GatewayResult};

/// Header consulted by the header strategy (matched case-insensitively)
pub const TARGET_HEADER: &str = "x-target-mcp";

/// Routing-relevant parts of an inbound call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path, used by the prefix strategy
    pub path: Option<String>,
    /// Request headers, used by the header strategy
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One consistent generation of routing rules, the backends they name and
/// the discovery settings applied to those backends
#[derive(Debug, Clone)]
pub struct RoutingSnapshot {
    strategy: RoutingStrategy,
    rules: HashMap<String, String>,
    default_backend: Option<String>,
    /// Backends in configuration order
    backends: Vec<Arc<BackendConfig>>,
    aggregation: AggregationConfig,
    generation: u64,
}

impl RoutingSnapshot {
    /// Build a snapshot from routing rules and backend descriptors
    pub fn new(routing: RoutingConfig, backends: Vec<BackendConfig>) -> Self {
        Self {
            strategy: routing.strategy,
            rules: routing.rules,
            default_backend: routing.default_backend,
            backends: backends.into_iter().map(Arc::new).collect(),
            aggregation: AggregationConfig::default(),
            generation: 0,
        }
    }

    /// Build a snapshot from a full gateway config
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.routing.clone(), config.backends.clone())
            .with_aggregation(config.aggregation.clone())
    }

    /// Set the discovery settings published with this snapshot
    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn rules(&self) -> &HashMap<String, String> {
        &self.rules
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend.as_deref()
    }

    /// All backends, in configuration order
    pub fn backends(&self) -> &[Arc<BackendConfig>] {
        &self.backends
    }

    /// Backend by name
    pub fn backend(&self, name: &str) -> Option<&Arc<BackendConfig>> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Discovery settings for this backend set
    pub fn aggregation(&self) -> &AggregationConfig {
        &self.aggregation
    }

    /// Monotonic reload counter (0 for the initial snapshot)
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Atomically swappable holder of the current snapshot
///
/// The lock only guards the pointer swap; readers clone the `Arc` and drop
/// the guard immediately, so it is never held across an await point.
#[derive(Debug)]
pub struct SharedSnapshot {
    current: RwLock<Arc<RoutingSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.read().clone()
    }

    /// Publish a new snapshot, returning the one it replaced.
    ///
    /// The new snapshot's generation is one past the previous one.
    pub fn replace(&self, mut snapshot: RoutingSnapshot) -> Arc<RoutingSnapshot> {
        let mut guard = self.current.write();
        snapshot.generation = guard.generation + 1;
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }
}

/// Resolve the backend that should handle a call.
///
/// Errors:
/// - unsupported strategy → "Invalid routing strategy"
/// - no key match and no default → "No route found"
/// - match (or default) naming a backend missing from the snapshot →
///   "Server not found"
pub fn resolve(ctx: &RequestContext, snapshot: &RoutingSnapshot) -> GatewayResult<Arc<BackendConfig>> {
    let route_key = match snapshot.strategy {
        RoutingStrategy::Prefix => ctx.path.as_deref().and_then(prefix_key),
        RoutingStrategy::Header => header_key(ctx),
        RoutingStrategy::Unsupported => {
            tracing::warn!("Routing with unsupported strategy");
            return Err(GatewayError::invalid_strategy());
        }
    };

    let target = route_key
        .as_deref()
        .and_then(|key| snapshot.rules.get(key))
        .or(snapshot.default_backend.as_ref());

    let Some(target) = target else {
        tracing::debug!(path = ?ctx.path, route_key = ?route_key, "No route found");
        return Err(GatewayError::no_route(ctx.path.clone(), route_key));
    };

    match snapshot.backend(target) {
        Some(backend) => {
            tracing::debug!(route_key = ?route_key, backend = %backend.name, "Resolved route");
            Ok(backend.clone())
        }
        None => {
            tracing::warn!(route_key = ?route_key, backend = %target, "Route points at unknown backend");
            Err(GatewayError::server_not_found(target, route_key))
        }
    }
}

/// First path segment after any leading slashes, if non-empty
///
/// ```
/// # use mcpgw_core::routing::prefix_key;
/// assert_eq!(prefix_key("//github/issues"), Some("github".to_string()));
/// assert_eq!(prefix_key("/"), None);
/// ```
pub fn prefix_key(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    let segment = match split_entity_prefix(trimmed) {
        Some((head, _)) => head,
        None => trimmed,
    };
    (!segment.is_empty()).then(|| segment.to_string())
}

fn header_key(ctx: &RequestContext) -> Option<String> {
    ctx.header(TARGET_HEADER)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Prepend `"prefix/"` to an ID, or return the ID unchanged when
/// `prefix` is `None`.
///
/// Used to qualify capability names with the backend that owns them.
///
/// ```
/// # use mcpgw_core::routing::prefixed_id;
/// assert_eq!(prefixed_id("search", Some("github")), "github/search");
/// assert_eq!(prefixed_id("search", None), "search");
/// ```
pub fn prefixed_id(id: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(pfx) => format!("{}/{}", pfx, id),
        None => id.to_string(),
    }
}

/// Split `"head/rest"` into `("head", "rest")`.
///
/// Returns `None` when there is no `/` in the string.
///
/// ```
/// # use mcpgw_core::routing::split_entity_prefix;
/// assert_eq!(split_entity_prefix("github/search"), Some(("github", "search")));
/// assert_eq!(split_entity_prefix("search"), None);
/// ```
pub fn split_entity_prefix(id: &str) -> Option<(&str, &str)> {
    let idx = id.find('/')?;
    Some((&id[..idx], &id[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoutingFailure;

    fn snapshot(strategy: RoutingStrategy, default: Option<&str>) -> RoutingSnapshot {
        let mut rules = HashMap::new();
        rules.insert("github".to_string(), "github-backend".to_string());
        rules.insert("ghost".to_string(), "missing-backend".to_string());
        RoutingSnapshot::new(
            RoutingConfig {
                strategy,
                rules,
                default_backend: default.map(str::to_string),
            },
            vec![
                BackendConfig::new("github-backend", "http://gh"),
                BackendConfig::new("fs", "http://fs"),
            ],
        )
    }

    fn failure(err: GatewayError) -> RoutingFailure {
        match err {
            GatewayError::Routing { failure, .. } => failure,
            other => panic!("expected routing error, got {:?}", other),
        }
    }

    #[test]
    fn prefix_routes_first_segment() {
        let snap = snapshot(RoutingStrategy::Prefix, None);
        let ctx = RequestContext::new().with_path("/github/x");
        assert_eq!(resolve(&ctx, &snap).unwrap().name, "github-backend");
    }

    #[test]
    fn prefix_strips_repeated_leading_slashes() {
        let snap = snapshot(RoutingStrategy::Prefix, None);
        let ctx = RequestContext::new().with_path("///github");
        assert_eq!(resolve(&ctx, &snap).unwrap().name, "github-backend");
    }

    #[test]
    fn empty_path_uses_default() {
        let snap = snapshot(RoutingStrategy::Prefix, Some("fs"));
        let ctx = RequestContext::new().with_path("");
        assert_eq!(resolve(&ctx, &snap).unwrap().name, "fs");
        assert_eq!(resolve(&RequestContext::new(), &snap).unwrap().name, "fs");
    }

    #[test]
    fn unmatched_key_uses_default() {
        let snap = snapshot(RoutingStrategy::Prefix, Some("fs"));
        let ctx = RequestContext::new().with_path("/unknown/x");
        assert_eq!(resolve(&ctx, &snap).unwrap().name, "fs");
    }

    #[test]
    fn empty_path_without_default_is_no_route() {
        let snap = snapshot(RoutingStrategy::Prefix, None);
        let err = resolve(&RequestContext::new().with_path(""), &snap).unwrap_err();
        assert_eq!(err.to_string(), "No route found");
        assert_eq!(failure(err), RoutingFailure::NoRoute);
    }

    #[test]
    fn rule_to_missing_backend_is_server_not_found() {
        let snap = snapshot(RoutingStrategy::Prefix, Some("fs"));
        let err = resolve(&RequestContext::new().with_path("/ghost"), &snap).unwrap_err();
        assert_eq!(failure(err), RoutingFailure::ServerNotFound);
    }

    #[test]
    fn default_to_missing_backend_is_server_not_found() {
        let snap = snapshot(RoutingStrategy::Prefix, Some("nowhere"));
        let err = resolve(&RequestContext::new(), &snap).unwrap_err();
        assert_eq!(failure(err), RoutingFailure::ServerNotFound);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let snap = snapshot(RoutingStrategy::Header, None);
        let upper = RequestContext::new().with_header("X-Target-MCP", "github");
        let lower = RequestContext::new().with_header("x-target-mcp", "github");
        assert_eq!(resolve(&upper, &snap).unwrap().name, "github-backend");
        assert_eq!(resolve(&lower, &snap).unwrap().name, "github-backend");
    }

    #[test]
    fn header_strategy_ignores_path() {
        let snap = snapshot(RoutingStrategy::Header, Some("fs"));
        let ctx = RequestContext::new().with_path("/github/x");
        assert_eq!(resolve(&ctx, &snap).unwrap().name, "fs");
    }

    #[test]
    fn empty_header_falls_through() {
        let snap = snapshot(RoutingStrategy::Header, None);
        let ctx = RequestContext::new().with_header("x-target-mcp", "  ");
        assert_eq!(failure(resolve(&ctx, &snap).unwrap_err()), RoutingFailure::NoRoute);
    }

    #[test]
    fn unsupported_strategy_fails() {
        let snap = snapshot(RoutingStrategy::Unsupported, Some("fs"));
        let err = resolve(&RequestContext::new().with_path("/github"), &snap).unwrap_err();
        assert_eq!(err.to_string(), "Invalid routing strategy");
        assert_eq!(failure(err), RoutingFailure::InvalidStrategy);
    }

    #[test]
    fn replace_keeps_old_snapshot_alive_for_readers() {
        let shared = SharedSnapshot::new(snapshot(RoutingStrategy::Prefix, Some("fs")));
        let captured = shared.load();
        assert_eq!(captured.generation(), 0);

        let next = RoutingSnapshot::new(
            RoutingConfig::default(),
            vec![BackendConfig::new("other", "http://other")],
        );
        let previous = shared.replace(next);

        assert!(Arc::ptr_eq(&previous, &captured));
        assert!(captured.backend("fs").is_some());
        let current = shared.load();
        assert_eq!(current.generation(), 1);
        assert!(current.backend("fs").is_none());
        assert!(current.backend("other").is_some());
    }

    #[test]
    fn aggregation_settings_travel_with_their_backends() {
        let first = GatewayConfig::from_toml_str(
            "[[backends]]\nname = \"a\"\nurl = \"http://a\"\n\n[aggregation]\ntimeout_ms = 111\n",
        )
        .unwrap();
        let second = GatewayConfig::from_toml_str(
            "[[backends]]\nname = \"b\"\nurl = \"http://b\"\n\n[aggregation]\ntimeout_ms = 222\n",
        )
        .unwrap();

        let shared = SharedSnapshot::new(RoutingSnapshot::from_config(&first));
        let captured = shared.load();
        shared.replace(RoutingSnapshot::from_config(&second));

        assert!(captured.backend("a").is_some());
        assert_eq!(captured.aggregation().timeout_ms, 111);
        let current = shared.load();
        assert!(current.backend("b").is_some());
        assert_eq!(current.aggregation().timeout_ms, 222);
    }

    #[test]
    fn prefixed_and_split_helpers() {
        assert_eq!(prefixed_id("search", Some("github")), "github/search");
        assert_eq!(
            split_entity_prefix("github/search/code"),
            Some(("github", "search/code"))
        );
        assert_eq!(prefix_key("github"), Some("github".to_string()));
        assert_eq!(prefix_key(""), None);
    }
}
