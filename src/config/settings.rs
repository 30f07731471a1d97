//! Router Configuration
//!
//! Root configuration structure and its construction-time validation.

use crate::config::backend::{BackendConfig, CircuitBreakerConfig};
use crate::error::{RouterError, Result};
use crate::router::policy::{PolicySettings, RoutingPolicy};
use crate::router::tracker::DEFAULT_WINDOW_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Backend definitions in registration order
    pub backends: Vec<BackendConfig>,

    /// Global circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Policy used when a request does not override it
    #[serde(default)]
    pub default_policy: RoutingPolicy,

    /// Capacity of each rolling statistics window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Window over which the load-balanced policy counts dispatches
    #[serde(default = "default_load_balance_window_secs")]
    pub load_balance_window_secs: u64,

    /// How long per-attempt costs are kept for cost summaries
    #[serde(default = "default_cost_retention_hours")]
    pub cost_retention_hours: u64,

    /// Policy engine tunables
    #[serde(default)]
    pub policy: PolicySettings,
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_load_balance_window_secs() -> u64 {
    60
}

fn default_cost_retention_hours() -> u64 {
    24 * 7
}

impl RouterConfig {
    /// Create a config with default settings for the given backends
    pub fn new(backends: Vec<BackendConfig>) -> Self {
        Self {
            backends,
            circuit_breaker: CircuitBreakerConfig::default(),
            default_policy: RoutingPolicy::default(),
            window_capacity: default_window_capacity(),
            load_balance_window_secs: default_load_balance_window_secs(),
            cost_retention_hours: default_cost_retention_hours(),
            policy: PolicySettings::default(),
        }
    }

    /// Set the default policy
    pub fn with_default_policy(mut self, policy: RoutingPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Set the global circuit breaker thresholds
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set the rolling window capacity
    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    /// Backends that will be registered
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled)
    }

    /// Breaker thresholds for a backend (its override, else the global default)
    pub fn breaker_for<'a>(&'a self, backend: &'a BackendConfig) -> &'a CircuitBreakerConfig {
        backend
            .circuit_breaker
            .as_ref()
            .unwrap_or(&self.circuit_breaker)
    }

    pub fn load_balance_window(&self) -> Duration {
        Duration::from_secs(self.load_balance_window_secs)
    }

    pub fn cost_retention(&self) -> Duration {
        Duration::from_secs(self.cost_retention_hours.saturating_mul(3600))
    }

    /// Fail fast on configurations the router cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(RouterError::Config("backend id must not be empty".to_string()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(RouterError::Config(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }
            if self.breaker_for(backend).failure_threshold == 0 {
                return Err(RouterError::Config(format!(
                    "failure_threshold for backend '{}' must be at least 1",
                    backend.id
                )));
            }
        }

        if self.enabled_backends().next().is_none() {
            return Err(RouterError::Config(
                "no enabled backends configured".to_string(),
            ));
        }
        if self.window_capacity == 0 {
            return Err(RouterError::Config(
                "window_capacity must be at least 1".to_string(),
            ));
        }

        self.policy.validate()
    }
}
