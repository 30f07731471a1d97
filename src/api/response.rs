//! Generation Responses
//!
//! One response per dispatch attempt. A response is successful exactly when
//! it carries no failure detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a dispatch attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BackendFailure {
    /// Network error, server error or rate limiting
    Transport(String),

    /// The attempt exceeded its per-request timeout
    Timeout(#[serde(with = "crate::api::duration_ms")] Duration),

    /// The backend reported the request as invalid
    Rejected(String),

    /// The dispatch task aborted before producing a response
    Panicked(String),
}

impl BackendFailure {
    /// Whether the same backend may be retried at the client tier
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendFailure::Transport(_) | BackendFailure::Timeout(_))
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            BackendFailure::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            BackendFailure::Rejected(msg) => write!(f, "rejected by backend: {}", msg),
            BackendFailure::Panicked(msg) => write!(f, "dispatch aborted: {}", msg),
        }
    }
}

/// Outcome of a single dispatch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Backend that produced this response
    pub backend_id: String,

    /// Generated content (empty on failure)
    pub content: String,

    /// Usage units consumed (tokens for most providers)
    pub usage_units: u64,

    /// Wall-clock latency of the attempt
    #[serde(with = "crate::api::duration_ms")]
    pub latency: Duration,

    /// Cost of the attempt
    pub cost: f64,

    /// Backend-reported confidence in [0, 1]
    pub confidence: f64,

    /// Failure detail; present iff the attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendFailure>,

    /// When the attempt completed
    pub timestamp: DateTime<Utc>,
}

impl GenerationResponse {
    /// Create a successful response
    pub fn success(
        backend_id: impl Into<String>,
        content: impl Into<String>,
        usage_units: u64,
        latency: Duration,
        cost: f64,
        confidence: f64,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            content: content.into(),
            usage_units,
            latency,
            cost: cost.max(0.0),
            confidence: clamp_unit(confidence),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a failed response
    pub fn failure(backend_id: impl Into<String>, error: BackendFailure, latency: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            content: String::new(),
            usage_units: 0,
            latency,
            cost: 0.0,
            confidence: 0.0,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Attach a cost to a failed attempt (some providers bill rejected calls)
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost.max(0.0);
        self
    }

    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Cost per usage unit; the raw cost when no units were reported
    pub fn cost_per_unit(&self) -> f64 {
        if self.usage_units == 0 {
            self.cost
        } else {
            self.cost / self.usage_units as f64
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_iff_no_error() {
        let ok = GenerationResponse::success("a", "text", 10, Duration::from_millis(5), 0.2, 0.9);
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let failed = GenerationResponse::failure(
            "a",
            BackendFailure::Transport("connection reset".into()),
            Duration::from_millis(5),
        );
        assert!(!failed.is_success());
        assert!(failed.content.is_empty());
    }

    #[test]
    fn test_confidence_clamped() {
        let high = GenerationResponse::success("a", "x", 1, Duration::ZERO, 0.0, 1.7);
        assert_eq!(high.confidence, 1.0);

        let nan = GenerationResponse::success("a", "x", 1, Duration::ZERO, 0.0, f64::NAN);
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_cost_per_unit() {
        let response = GenerationResponse::success("a", "x", 200, Duration::ZERO, 4.0, 0.5);
        assert!((response.cost_per_unit() - 0.02).abs() < 1e-12);

        let unitless = GenerationResponse::success("a", "x", 0, Duration::ZERO, 0.3, 0.5);
        assert_eq!(unitless.cost_per_unit(), 0.3);
    }

    #[test]
    fn test_failure_serialization() {
        let failed = GenerationResponse::failure(
            "slow",
            BackendFailure::Timeout(Duration::from_millis(1500)),
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"]["kind"], "timeout");
        assert_eq!(json["error"]["detail"], 1500);
        assert!(BackendFailure::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!BackendFailure::Rejected("bad".into()).is_transient());
    }
}
