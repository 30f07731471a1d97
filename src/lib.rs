//! llmroute - Adaptive Multi-Backend Request Router
//!
//! Routes text-generation requests across interchangeable backends. For each
//! request the router picks a backend under a scoring policy, dispatches to
//! it, folds the outcome into per-backend circuit breakers and rolling
//! statistics, and falls back to the next eligible backend on failure.

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod router;

pub use api::{BackendFailure, GenerationParams, GenerationRequest, GenerationResponse, Priority};
pub use client::{BackendClient, HttpBackend};
pub use config::{ConfigLoader, RouterConfig};
pub use error::{Result, RouterError};
pub use router::{BackendMetrics, CircuitState, CostSummary, RoutingPolicy};

use router::{Candidate, CircuitBreaker, PerformanceRecord, PerformanceTracker, PolicyEngine};

/// Everything the router owns for one backend id
struct BackendSlot {
    id: String,
    client: Arc<dyn BackendClient>,
    breaker: Arc<CircuitBreaker>,
    record: Arc<PerformanceRecord>,
}

/// The adaptive request router
pub struct Router {
    /// Backends in registration order
    backends: Vec<BackendSlot>,

    index: HashMap<String, usize>,

    tracker: PerformanceTracker,

    engine: PolicyEngine,

    default_policy: RwLock<RoutingPolicy>,
}

impl Router {
    /// Load configuration from the default locations and build HTTP clients
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config())
    }

    /// Create a router with a custom config path
    pub fn with_config_path(path: &str) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config())
    }

    /// Create a router, building each enabled backend's client from its config
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let mut clients = HashMap::new();
        for backend in config.enabled_backends() {
            let client_config = backend.client.as_ref().ok_or_else(|| {
                RouterError::Config(format!("backend '{}' has no client configuration", backend.id))
            })?;
            clients.insert(
                backend.id.clone(),
                client::create_client(&backend.id, client_config)?,
            );
        }

        Self::with_clients(config, clients)
    }

    /// Create a router from caller-provided clients keyed by backend id
    pub fn with_clients(
        config: RouterConfig,
        mut clients: HashMap<String, Arc<dyn BackendClient>>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = PolicyEngine::new(config.policy.clone())?;

        let mut backends = Vec::new();
        let mut index = HashMap::new();
        let mut tracker = PerformanceTracker::new();

        for backend in config.enabled_backends() {
            let client = clients.remove(&backend.id).ok_or_else(|| {
                RouterError::Config(format!("no client provided for backend '{}'", backend.id))
            })?;

            let thresholds = config.breaker_for(backend);
            let breaker = Arc::new(CircuitBreaker::new(
                backend.id.clone(),
                thresholds.failure_threshold,
                thresholds.recovery_timeout(),
            ));
            let record = tracker.register(PerformanceRecord::new(
                backend.id.clone(),
                config.window_capacity,
                config.load_balance_window(),
                config.cost_retention(),
            ));

            index.insert(backend.id.clone(), backends.len());
            backends.push(BackendSlot {
                id: backend.id.clone(),
                client,
                breaker,
                record,
            });
        }

        if !clients.is_empty() {
            let mut extra: Vec<_> = clients.into_keys().collect();
            extra.sort();
            warn!(backends = ?extra, "ignoring clients with no enabled backend definition");
        }

        debug!(
            backends = backends.len(),
            policy = %config.default_policy,
            "router initialized"
        );

        Ok(Self {
            backends,
            index,
            tracker,
            engine,
            default_policy: RwLock::new(config.default_policy),
        })
    }

    /// Route a request, falling back across eligible backends on failure.
    ///
    /// Returns the first successful response, or the last failed one when
    /// every attempt failed. Errors only when no backend could be tried at
    /// all or the request is malformed.
    pub async fn route(
        &self,
        request: &GenerationRequest,
        policy_override: Option<RoutingPolicy>,
    ) -> Result<GenerationResponse> {
        request.validate()?;

        let eligible = self.eligible();
        if eligible.is_empty() {
            warn!("no eligible backend, every circuit is open");
            return Err(RouterError::NoBackendAvailable);
        }

        let policy = policy_override
            .or(request.policy)
            .unwrap_or_else(|| self.default_policy());
        let budget = request
            .max_attempts
            .unwrap_or(eligible.len())
            .min(eligible.len());
        let shared = Arc::new(request.clone());

        let mut tried = HashSet::new();
        let mut attempts = 0;
        let mut last_failure: Option<GenerationResponse> = None;

        while attempts < budget {
            let remaining: Vec<usize> = eligible
                .iter()
                .copied()
                .filter(|idx| !tried.contains(idx) && self.backends[*idx].breaker.can_execute())
                .collect();
            if remaining.is_empty() {
                break;
            }

            let chosen = self.choose(request, policy, &remaining, tried.is_empty())?;
            tried.insert(chosen);
            let slot = &self.backends[chosen];

            let response = match self.dispatch(slot, shared.clone()).await {
                Ok(response) => response,
                Err(RouterError::CircuitOpen(id)) => {
                    debug!(backend = %id, "probe slot taken, skipping backend");
                    continue;
                }
                Err(e) => return Err(e),
            };
            attempts += 1;

            if response.is_success() {
                if attempts > 1 {
                    debug!(backend = %slot.id, attempts, "fallback succeeded");
                }
                return Ok(response);
            }

            warn!(
                backend = %slot.id,
                attempt = attempts,
                error = ?response.error,
                "backend attempt failed"
            );
            last_failure = Some(response);
        }

        match last_failure {
            Some(response) => {
                warn!(
                    backend = %response.backend_id,
                    attempts,
                    "all routing attempts failed"
                );
                Ok(response)
            }
            None => Err(RouterError::NoBackendAvailable),
        }
    }

    /// Per-backend metrics snapshot
    pub fn metrics(&self) -> HashMap<String, BackendMetrics> {
        self.backends
            .iter()
            .map(|slot| {
                let state = slot.breaker.effective_state();
                (slot.id.clone(), slot.record.metrics(state))
            })
            .collect()
    }

    /// Cost over the trailing `window_hours`, total and per backend
    pub fn cost_summary(&self, window_hours: f64) -> CostSummary {
        self.tracker.cost_summary(window_hours)
    }

    /// Force a backend's circuit closed
    pub fn reset_circuit_breaker(&self, backend_id: &str) -> Result<()> {
        self.slot(backend_id)?.breaker.reset();
        Ok(())
    }

    /// Replace the default routing policy
    pub fn set_default_policy(&self, policy: RoutingPolicy) {
        *self.default_policy.write() = policy;
        debug!(policy = %policy, "default policy updated");
    }

    /// Current default routing policy
    pub fn default_policy(&self) -> RoutingPolicy {
        *self.default_policy.read()
    }

    /// Circuit state of a backend, counting an elapsed recovery timeout as half-open
    pub fn circuit_state(&self, backend_id: &str) -> Result<CircuitState> {
        Ok(self.slot(backend_id)?.breaker.effective_state())
    }

    /// Registered backend ids in registration order
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|s| s.id.clone()).collect()
    }

    /// Direct handle to a backend's client, bypassing routing
    pub fn client(&self, backend_id: &str) -> Result<Arc<dyn BackendClient>> {
        Ok(self.slot(backend_id)?.client.clone())
    }

    /// Run every backend's health check concurrently
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let checks = self.backends.iter().map(|slot| async move {
            (slot.id.clone(), slot.client.health_check().await)
        });
        join_all(checks).await.into_iter().collect()
    }

    fn slot(&self, backend_id: &str) -> Result<&BackendSlot> {
        self.index
            .get(backend_id)
            .map(|&idx| &self.backends[idx])
            .ok_or_else(|| RouterError::UnknownBackend(backend_id.to_string()))
    }

    fn eligible(&self) -> Vec<usize> {
        (0..self.backends.len())
            .filter(|&idx| self.backends[idx].breaker.can_execute())
            .collect()
    }

    /// Pick a backend index from `remaining`
    fn choose(
        &self,
        request: &GenerationRequest,
        policy: RoutingPolicy,
        remaining: &[usize],
        first_attempt: bool,
    ) -> Result<usize> {
        if first_attempt {
            if let Some(target) = request.target_backend.as_deref() {
                match self.index.get(target) {
                    Some(idx) if remaining.contains(idx) => {
                        debug!(backend = %target, "using caller-selected backend");
                        return Ok(*idx);
                    }
                    Some(_) => debug!(backend = %target, "target backend not eligible"),
                    None => warn!(backend = %target, "target backend is not registered"),
                }
            }
        }

        let candidates: Vec<Candidate> = remaining
            .iter()
            .map(|&idx| {
                let slot = &self.backends[idx];
                Candidate {
                    metrics: slot.record.metrics(slot.breaker.effective_state()),
                    advertised_cost_per_unit: slot.client.cost_per_unit(),
                    recent_uses: slot.record.recent_uses(),
                }
            })
            .collect();

        let pick = self.engine.select(policy, &candidates)?;
        debug!(
            backend = %candidates[pick].backend_id(),
            policy = %policy,
            candidates = candidates.len(),
            "policy selected backend"
        );
        Ok(remaining[pick])
    }

    /// Run one attempt against `slot`.
    ///
    /// The call and its bookkeeping run in a spawned task, so an attempt
    /// abandoned by a cancelled `route` still updates the breaker and record.
    /// A panicking client is settled there too, as a `Panicked` failure.
    async fn dispatch(
        &self,
        slot: &BackendSlot,
        request: Arc<GenerationRequest>,
    ) -> Result<GenerationResponse> {
        slot.breaker.try_acquire()?;
        slot.record.mark_dispatched();
        debug!(backend = %slot.id, "dispatching");

        let id = slot.id.clone();
        let client = slot.client.clone();
        let breaker = slot.breaker.clone();
        let record = slot.record.clone();

        let task = tokio::spawn(async move {
            let timeout = request.params.timeout;
            let started = tokio::time::Instant::now();
            let call = AssertUnwindSafe(client.execute(&request)).catch_unwind();

            let mut response = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(response)) => response,
                Ok(Err(panic)) => GenerationResponse::failure(
                    id.as_str(),
                    BackendFailure::Panicked(panic_message(panic.as_ref())),
                    started.elapsed(),
                ),
                Err(_) => GenerationResponse::failure(
                    id.as_str(),
                    BackendFailure::Timeout(timeout),
                    started.elapsed(),
                ),
            };
            response.backend_id = id;
            if response.latency.is_zero() {
                response.latency = started.elapsed();
            }

            settle(&breaker, &record, &response);
            response
        });

        task.await.map_err(|e| {
            // only reachable if the runtime aborts the task
            RouterError::Internal(format!("dispatch task for '{}' failed: {}", slot.id, e))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "backend client panicked".to_string()
    }
}

/// Fold one attempt's outcome into its breaker and record
fn settle(breaker: &CircuitBreaker, record: &PerformanceRecord, response: &GenerationResponse) {
    if response.is_success() {
        breaker.record_success();
    } else {
        breaker.record_failure();
    }
    record.record(response);
}
