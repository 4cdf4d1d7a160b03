//! Gateway configuration
//!
//! Loaded from TOML. Backend descriptors and routing rules produced here
//! are turned into a [`crate::routing::RoutingSnapshot`] and published as
//! one unit.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//!
//! [[backends]]
//! name = "github"
//! url = "http://localhost:4001/rpc"
//! timeout_ms = 10000
//! max_retries = 2
//!
//! [routing]
//! strategy = "prefix"
//! default_backend = "github"
//!
//! [routing.rules]
//! github = "github"
//!
//! [aggregation]
//! conflict_resolution = "suffix"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Descriptor of one backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name
    pub name: String,
    /// Base address requests are POSTed to
    pub url: String,
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Path appended to `url` for health probes
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl BackendConfig {
    /// Backend with default timeout, retries and health path
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            health_path: default_health_path(),
        }
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// URL probed by health checks
    pub fn health_url(&self) -> String {
        let path = if self.health_path.is_empty() {
            "/health"
        } else {
            self.health_path.as_str()
        };
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }
}

/// How the router derives its lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// First path segment
    #[default]
    Prefix,
    /// Value of the `x-target-mcp` header
    Header,
    /// Anything else found in the config; rejected at routing time
    #[serde(other)]
    Unsupported,
}

/// Routing rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Route key → backend name
    #[serde(default)]
    pub rules: HashMap<String, String>,
    /// Backend used when no rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,
}

/// What to do when several backends expose the same capability name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Keep the first occurrence, drop later ones
    KeepFirst,
    /// Later occurrences overwrite earlier ones
    KeepLast,
    /// Qualify duplicates with the owning backend name
    #[default]
    Prefix,
    /// Append `_1`, `_2`, ... to duplicates
    Suffix,
}

/// Discovery fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Keep going when some backends fail
    #[serde(default = "default_true")]
    pub continue_on_partial_failure: bool,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    /// Overall deadline for one aggregation round
    #[serde(default = "default_aggregation_timeout_ms")]
    pub timeout_ms: u64,
    /// Include per-backend outcomes and stats in the result
    #[serde(default = "default_true")]
    pub include_details: bool,
}

fn default_true() -> bool {
    true
}

fn default_aggregation_timeout_ms() -> u64 {
    30_000
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            continue_on_partial_failure: true,
            conflict_resolution: ConflictResolution::default(),
            timeout_ms: default_aggregation_timeout_ms(),
            include_details: true,
        }
    }
}

impl AggregationConfig {
    /// Overall round deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry settings shared by all backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Base of the exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl ForwardingConfig {
    /// Backoff base
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
}

impl GatewayConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural invariants.
    ///
    /// Rules naming unknown backends are allowed (they fail at routing time
    /// with "Server not found") but logged.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::InvalidBackend {
                    name: backend.name.clone(),
                    reason: "name must not be empty".to_string(),
                });
            }
            if backend.url.trim().is_empty() {
                return Err(ConfigError::InvalidBackend {
                    name: backend.name.clone(),
                    reason: "url must not be empty".to_string(),
                });
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::DuplicateBackend(backend.name.clone()));
            }
        }

        for (key, target) in &self.routing.rules {
            if !seen.contains(target.as_str()) {
                tracing::warn!(route_key = %key, backend = %target, "Routing rule points at unknown backend");
            }
        }
        if let Some(default) = &self.routing.default_backend {
            if !seen.contains(default.as_str()) {
                tracing::warn!(backend = %default, "Default backend is not configured");
            }
        }
        if self.routing.strategy == RoutingStrategy::Unsupported {
            tracing::warn!("Unsupported routing strategy configured; routed calls will fail");
        }

        Ok(())
    }
}
