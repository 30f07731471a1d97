//! Backend Configuration
//!
//! Defines the configuration schema for individual backends.

use crate::router::circuit_breaker::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable backend id
    pub id: String,

    /// Disabled backends are skipped at router construction
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How to build the client; omitted when the caller supplies clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Per-backend circuit breaker override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    /// Create an enabled backend definition without a client config
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            client: None,
            circuit_breaker: None,
        }
    }

    /// Set the client configuration
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = Some(client);
        self
    }

    /// Override circuit breaker thresholds for this backend
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Enable or disable the backend
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT.as_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Client construction settings, tagged by client type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientConfig {
    /// OpenAI-compatible chat completions endpoint
    Http(HttpClientConfig),
}

/// Settings for an OpenAI-compatible HTTP backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Model name sent with every request
    pub model: String,

    /// Environment variable name for the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Optional environment variable for a custom base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_env: Option<String>,

    /// Additional headers to send with requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Price of one usage unit (token)
    #[serde(default)]
    pub cost_per_unit: f64,

    /// Confidence reported for a complete answer
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,

    /// Same-backend retries for transient transport errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval between retries
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_confidence() -> f64 {
    0.8
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_interval_ms() -> u64 {
    500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl HttpClientConfig {
    /// Create a config with defaults for everything but the endpoint and model
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
            api_base_env: None,
            headers: HashMap::new(),
            cost_per_unit: 0.0,
            base_confidence: default_base_confidence(),
            max_retries: default_max_retries(),
            retry_initial_interval_ms: default_retry_initial_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.api_base_env {
            if let Ok(url) = std::env::var(env_var) {
                return url;
            }
        }
        self.base_url.clone()
    }

    /// Get the API key, if one is configured and set
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok())
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_backend_config() {
        let json = r#"{
            "id": "primary",
            "client": {
                "type": "http",
                "base_url": "https://api.example.com/v1",
                "model": "model-a",
                "api_key_env": "EXAMPLE_API_KEY",
                "cost_per_unit": 0.00002
            },
            "circuit_breaker": { "failure_threshold": 2 }
        }"#;

        let config: BackendConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, "primary");
        assert!(config.enabled);

        let Some(ClientConfig::Http(http)) = config.client else {
            panic!("expected http client config");
        };
        assert_eq!(http.model, "model-a");
        assert_eq!(http.max_retries, 3);
        assert_eq!(http.base_confidence, 0.8);

        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.recovery_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_base_url_env_override() {
        let mut config = HttpClientConfig::new("https://default.example.com", "m");
        config.api_base_env = Some("LLMROUTE_TEST_BASE_URL_OVERRIDE".to_string());
        assert_eq!(config.get_base_url(), "https://default.example.com");

        std::env::set_var("LLMROUTE_TEST_BASE_URL_OVERRIDE", "https://override.example.com");
        assert_eq!(config.get_base_url(), "https://override.example.com");
        std::env::remove_var("LLMROUTE_TEST_BASE_URL_OVERRIDE");
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = HttpClientConfig::new("https://api.example.com", "m");
        assert!(config.get_api_key().is_none());

        config.api_key_env = Some("LLMROUTE_TEST_UNSET_KEY".to_string());
        assert!(config.get_api_key().is_none());
    }
}
