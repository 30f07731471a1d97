//! Generation Requests
//!
//! The caller-facing request type handed to the router.

use crate::error::{RouterError, Result};
use crate::router::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request priority hint, forwarded to backends that support it
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Timeout applied to every individual dispatch attempt
    #[serde(with = "crate::api::duration_ms")]
    pub timeout: Duration,

    /// Priority hint
    #[serde(default)]
    pub priority: Priority,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            timeout: DEFAULT_TIMEOUT,
            priority: Priority::Normal,
        }
    }
}

/// A generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,

    /// Free-form context supplied by the content-build step
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Generation parameters
    #[serde(default)]
    pub params: GenerationParams,

    /// Backend to use when it is eligible, bypassing policy selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_backend: Option<String>,

    /// Policy to use for this request instead of the router default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<RoutingPolicy>,

    /// Maximum number of backends to try (defaults to the eligible set size)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
}

impl GenerationRequest {
    /// Create a new request with default parameters
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: HashMap::new(),
            params: GenerationParams::default(),
            target_backend: None,
            policy: None,
            max_attempts: None,
        }
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.params.timeout = timeout;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.params.priority = priority;
        self
    }

    /// Prefer a specific backend
    pub fn with_target_backend(mut self, backend_id: impl Into<String>) -> Self {
        self.target_backend = Some(backend_id.into());
        self
    }

    /// Override the routing policy
    pub fn with_policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Limit the number of backends tried
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Check the request contract before dispatch
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(RouterError::InvalidRequest("prompt is empty".to_string()));
        }
        let temperature = self.params.temperature;
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(RouterError::InvalidRequest(format!(
                "temperature {} outside [0, 2]",
                temperature
            )));
        }
        if self.params.timeout.is_zero() {
            return Err(RouterError::InvalidRequest("timeout must be non-zero".to_string()));
        }
        if self.max_attempts == Some(0) {
            return Err(RouterError::InvalidRequest(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = GenerationRequest::new("Summarize the quarter")
            .with_context("region", serde_json::json!("emea"))
            .with_max_tokens(256)
            .with_temperature(0.2)
            .with_target_backend("fast")
            .with_policy(RoutingPolicy::CostAware)
            .with_max_attempts(2);

        assert_eq!(request.params.max_tokens, 256);
        assert_eq!(request.target_backend.as_deref(), Some("fast"));
        assert_eq!(request.policy, Some(RoutingPolicy::CostAware));
        assert_eq!(request.context["region"], "emea");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(GenerationRequest::new("   ").validate().is_err());
        assert!(GenerationRequest::new("hi")
            .with_temperature(3.5)
            .validate()
            .is_err());
        assert!(GenerationRequest::new("hi")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(GenerationRequest::new("hi")
            .with_max_attempts(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "prompt": "Explain the variance",
            "params": { "max_tokens": 64, "temperature": 0.1, "timeout": 1500 },
            "policy": "latency_aware"
        }"#;

        let request: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.params.timeout, Duration::from_millis(1500));
        assert_eq!(request.params.priority, Priority::Normal);
        assert_eq!(request.policy, Some(RoutingPolicy::LatencyAware));
        assert!(request.target_backend.is_none());
    }
}
