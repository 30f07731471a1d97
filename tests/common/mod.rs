//! Shared fixtures for router integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use llmroute::config::{BackendConfig, CircuitBreakerConfig};
use llmroute::{
    BackendClient, BackendFailure, GenerationRequest, GenerationResponse, Router, RouterConfig,
    RoutingPolicy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory backend whose behaviour tests can change between calls
pub struct ScriptedBackend {
    pub id: String,
    latency_ms: AtomicU64,
    delay_ms: AtomicU64,
    cost_per_unit: f64,
    confidence: f64,
    units: u64,
    failing: AtomicBool,
    rejecting: AtomicBool,
    panicking: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(id: &str, latency_ms: u64, cost_per_unit: f64, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            latency_ms: AtomicU64::new(latency_ms),
            delay_ms: AtomicU64::new(0),
            cost_per_unit,
            confidence,
            units: 100,
            failing: AtomicBool::new(false),
            rejecting: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    /// Make every subsequent call fail with a transport error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every subsequent call be rejected as invalid
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Make every subsequent call panic after its delay
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    /// Latency reported in responses
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    /// Real time each call takes before answering
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn execute(&self, _request: &GenerationRequest) -> GenerationResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.panicking.load(Ordering::SeqCst) {
            panic!("{} client crashed", self.id);
        }

        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        if self.rejecting.load(Ordering::SeqCst) {
            return GenerationResponse::failure(
                &self.id,
                BackendFailure::Rejected("prompt too long".into()),
                latency,
            );
        }
        if self.failing.load(Ordering::SeqCst) {
            return GenerationResponse::failure(
                &self.id,
                BackendFailure::Transport("connection reset by peer".into()),
                latency,
            );
        }

        GenerationResponse::success(
            &self.id,
            format!("analysis from {}", self.id),
            self.units,
            latency,
            self.units as f64 * self.cost_per_unit,
            self.confidence,
        )
    }

    async fn health_check(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    fn cost_per_unit(&self) -> f64 {
        self.cost_per_unit
    }
}

/// Build a router over scripted backends, registered in slice order
pub fn build_router(
    backends: &[&Arc<ScriptedBackend>],
    policy: RoutingPolicy,
    failure_threshold: u32,
    window_capacity: usize,
) -> Router {
    llmroute::logging::init_tracing();

    let config = RouterConfig::new(backends.iter().map(|b| BackendConfig::new(b.id.as_str())).collect())
        .with_default_policy(policy)
        .with_window_capacity(window_capacity)
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout_secs: 60,
        });

    let clients: HashMap<String, Arc<dyn BackendClient>> = backends
        .iter()
        .map(|b| (b.id.clone(), Arc::clone(b) as Arc<dyn BackendClient>))
        .collect();

    Router::with_clients(config, clients).expect("valid router config")
}

/// Route one request pinned to each backend so every backend has samples
pub async fn warm_up(router: &Router, backends: &[&Arc<ScriptedBackend>]) {
    for backend in backends {
        let request = GenerationRequest::new("warm up").with_target_backend(backend.id.as_str());
        let response = router.route(&request, None).await.expect("warm-up routed");
        assert_eq!(response.backend_id, backend.id);
    }
}

pub fn request() -> GenerationRequest {
    GenerationRequest::new("Analyse the quarterly revenue variance")
}
