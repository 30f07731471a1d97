//! Routing Policies
//!
//! Scores eligible backends and selects one. Every policy breaks ties in
//! favour of the earlier candidate, so registration order is the final
//! tie-breaker.

use crate::error::{RouterError, Result};
use crate::router::tracker::BackendMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scoring rule used to choose among eligible backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Highest average confidence
    AccuracyFirst,

    /// Lowest average cost per unit
    CostAware,

    /// Lowest average latency
    LatencyAware,

    /// Fewest recent dispatches
    LoadBalanced,

    /// Weighted blend of confidence, cost, latency and success rate
    #[default]
    Adaptive,
}

impl RoutingPolicy {
    /// All policies, in declaration order
    pub const ALL: [RoutingPolicy; 5] = [
        RoutingPolicy::AccuracyFirst,
        RoutingPolicy::CostAware,
        RoutingPolicy::LatencyAware,
        RoutingPolicy::LoadBalanced,
        RoutingPolicy::Adaptive,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingPolicy::AccuracyFirst => "accuracy_first",
            RoutingPolicy::CostAware => "cost_aware",
            RoutingPolicy::LatencyAware => "latency_aware",
            RoutingPolicy::LoadBalanced => "load_balanced",
            RoutingPolicy::Adaptive => "adaptive",
        }
    }
}

impl FromStr for RoutingPolicy {
    type Err = RouterError;

    /// Parse a policy name; `-` and `_` are interchangeable and case is ignored
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RoutingPolicy::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                RouterError::Policy(format!(
                    "Unknown routing policy '{}'. Expected one of: accuracy_first, cost_aware, latency_aware, load_balanced, adaptive",
                    s
                ))
            })
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weights of the adaptive score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveWeights {
    pub confidence: f64,
    pub cost: f64,
    pub latency: f64,
    pub success_rate: f64,
}

impl Default for AdaptiveWeights {
    fn default() -> Self {
        Self {
            confidence: 0.3,
            cost: 0.2,
            latency: 0.2,
            success_rate: 0.3,
        }
    }
}

/// Tunables for the policy engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Adaptive score weights
    pub weights: AdaptiveWeights,

    /// Cost per unit at which cost efficiency reaches zero
    pub cost_reference: f64,

    /// Latency at which latency efficiency reaches zero
    pub latency_reference_ms: f64,

    /// Confidence assumed for a backend with no samples
    pub neutral_confidence: f64,

    /// Latency assumed for a backend with no samples
    pub neutral_latency_ms: f64,

    /// Adaptive score given to a backend with no samples
    pub exploration_score: f64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            weights: AdaptiveWeights::default(),
            cost_reference: 0.1,
            latency_reference_ms: 10_000.0,
            neutral_confidence: 0.5,
            neutral_latency_ms: 1_000.0,
            exploration_score: 0.5,
        }
    }
}

impl PolicySettings {
    /// Reject settings that would make scores meaningless
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        let weights = [w.confidence, w.cost, w.latency, w.success_rate];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RouterError::Policy(
                "adaptive weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(RouterError::Policy(
                "at least one adaptive weight must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("cost_reference", self.cost_reference),
            ("latency_reference_ms", self.latency_reference_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RouterError::Policy(format!("{} must be positive", name)));
            }
        }
        for (name, value) in [
            ("neutral_confidence", self.neutral_confidence),
            ("exploration_score", self.exploration_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RouterError::Policy(format!("{} must be within [0, 1]", name)));
            }
        }
        if !self.neutral_latency_ms.is_finite() || self.neutral_latency_ms < 0.0 {
            return Err(RouterError::Policy(
                "neutral_latency_ms must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// An eligible backend as seen by the policy engine
#[derive(Debug, Clone)]
pub struct Candidate {
    pub metrics: BackendMetrics,

    /// Cost per unit advertised by the client
    pub advertised_cost_per_unit: f64,

    /// Dispatches started within the load-balancing window
    pub recent_uses: usize,
}

impl Candidate {
    pub fn backend_id(&self) -> &str {
        &self.metrics.backend_id
    }
}

/// Scores candidates under a policy
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    settings: PolicySettings,
}

impl PolicyEngine {
    /// Create an engine after validating its settings
    pub fn new(settings: PolicySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Get the settings
    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Select one candidate, returning its index in `candidates`
    pub fn select(&self, policy: RoutingPolicy, candidates: &[Candidate]) -> Result<usize> {
        if candidates.is_empty() {
            return Err(RouterError::NoBackendAvailable);
        }

        let chosen = match policy {
            RoutingPolicy::AccuracyFirst => pick_max(candidates, |c| self.confidence(c)),
            RoutingPolicy::CostAware => pick_max(candidates, |c| -self.cost(c)),
            RoutingPolicy::LatencyAware => pick_max(candidates, |c| -self.latency(c)),
            RoutingPolicy::LoadBalanced => pick_max(candidates, |c| -(c.recent_uses as f64)),
            RoutingPolicy::Adaptive => pick_max(candidates, |c| self.adaptive_score(c)),
        };

        Ok(chosen)
    }

    /// Adaptive score in [0, 1] (for normalized weights)
    pub fn adaptive_score(&self, candidate: &Candidate) -> f64 {
        let m = &candidate.metrics;
        if m.is_untested() {
            return self.settings.exploration_score;
        }

        let s = &self.settings;
        if m.sample_count == 0 {
            // attempted but never succeeded: nothing to credit beyond the rate
            return s.weights.success_rate * m.success_rate;
        }

        let cost_efficiency = invert(self.cost(candidate), s.cost_reference);
        let latency_efficiency = invert(self.latency(candidate), s.latency_reference_ms);

        s.weights.confidence * self.confidence(candidate)
            + s.weights.cost * cost_efficiency
            + s.weights.latency * latency_efficiency
            + s.weights.success_rate * m.success_rate
    }

    fn confidence(&self, c: &Candidate) -> f64 {
        c.metrics
            .avg_confidence
            .unwrap_or(self.settings.neutral_confidence)
    }

    fn cost(&self, c: &Candidate) -> f64 {
        c.metrics
            .avg_cost_per_unit
            .unwrap_or(c.advertised_cost_per_unit)
    }

    fn latency(&self, c: &Candidate) -> f64 {
        c.metrics
            .avg_latency_ms
            .unwrap_or(self.settings.neutral_latency_ms)
    }
}

fn invert(value: f64, reference: f64) -> f64 {
    (1.0 - value / reference).clamp(0.0, 1.0)
}

/// Index of the highest score; the first candidate wins ties
fn pick_max(candidates: &[Candidate], score: impl Fn(&Candidate) -> f64) -> usize {
    let mut best = 0;
    let mut best_score = score(&candidates[0]);
    for (idx, candidate) in candidates.iter().enumerate().skip(1) {
        let s = score(candidate);
        if s > best_score || (best_score.is_nan() && !s.is_nan()) {
            best = idx;
            best_score = s;
        }
    }
    best
}
