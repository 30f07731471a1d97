//! Router Module
//!
//! Circuit breaking, performance tracking and policy-based backend selection.

pub mod circuit_breaker;
pub mod policy;
pub mod tracker;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use policy::{AdaptiveWeights, Candidate, PolicyEngine, PolicySettings, RoutingPolicy};
pub use tracker::{
    BackendCost, BackendMetrics, CostSummary, PerformanceRecord, PerformanceTracker, RollingWindow,
};
