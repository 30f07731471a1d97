//! Performance Tracking
//!
//! Rolling per-backend statistics used to score backends, plus monotonic
//! totals and a timestamped cost ledger for cost summaries.

use crate::api::GenerationResponse;
use crate::router::circuit_breaker::CircuitState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default rolling window capacity
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Bounded history of samples; the oldest sample is evicted once full
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    /// Create an empty window
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest on overflow
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Mean of the current samples
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
struct RecordInner {
    latency_ms: RollingWindow,
    cost_per_unit: RollingWindow,
    confidence: RollingWindow,

    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    total_cost: f64,

    recent_dispatches: VecDeque<Instant>,
    cost_ledger: VecDeque<(DateTime<Utc>, f64)>,
}

/// Statistics for one backend
#[derive(Debug)]
pub struct PerformanceRecord {
    backend_id: String,
    load_window: Duration,
    /// `None` when the configured retention is too long to represent
    cost_retention: Option<ChronoDuration>,
    inner: Mutex<RecordInner>,
}

/// Per-backend metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub backend_id: String,

    /// Mean latency of recent successes (ms), `None` before any success
    pub avg_latency_ms: Option<f64>,

    /// Mean cost per unit of recent successes
    pub avg_cost_per_unit: Option<f64>,

    /// Mean confidence of recent successes
    pub avg_confidence: Option<f64>,

    /// successes / total attempts, 0 with no attempts
    pub success_rate: f64,

    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_cost: f64,

    /// Samples currently held in the rolling windows
    pub sample_count: usize,

    pub circuit_state: CircuitState,
}

impl BackendMetrics {
    /// Whether this backend has never had an attempt recorded
    pub fn is_untested(&self) -> bool {
        self.total_requests == 0
    }
}

impl PerformanceRecord {
    /// Create an empty record
    pub fn new(
        backend_id: impl Into<String>,
        window_capacity: usize,
        load_window: Duration,
        cost_retention: Duration,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            load_window,
            cost_retention: ChronoDuration::from_std(cost_retention).ok(),
            inner: Mutex::new(RecordInner {
                latency_ms: RollingWindow::new(window_capacity),
                cost_per_unit: RollingWindow::new(window_capacity),
                confidence: RollingWindow::new(window_capacity),
                total_requests: 0,
                success_count: 0,
                failure_count: 0,
                total_cost: 0.0,
                recent_dispatches: VecDeque::new(),
                cost_ledger: VecDeque::new(),
            }),
        }
    }

    /// Get the backend id
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Fold a completed attempt into the record
    pub fn record(&self, response: &GenerationResponse) {
        let mut inner = self.inner.lock();

        inner.total_requests += 1;
        if response.is_success() {
            inner.success_count += 1;
            inner.latency_ms.push(response.latency.as_secs_f64() * 1000.0);
            inner.cost_per_unit.push(response.cost_per_unit());
            inner.confidence.push(response.confidence);
        } else {
            inner.failure_count += 1;
        }

        if response.cost > 0.0 {
            inner.total_cost += response.cost;
            inner.cost_ledger.push_back((response.timestamp, response.cost));
        }

        let horizon = self
            .cost_retention
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        if let Some(horizon) = horizon {
            while inner
                .cost_ledger
                .front()
                .is_some_and(|(at, _)| *at < horizon)
            {
                inner.cost_ledger.pop_front();
            }
        }
    }

    /// Note that a dispatch to this backend is starting
    pub fn mark_dispatched(&self) {
        let mut inner = self.inner.lock();
        self.prune_dispatches(&mut inner);
        inner.recent_dispatches.push_back(Instant::now());
    }

    /// Dispatches started within the load-balancing window
    pub fn recent_uses(&self) -> usize {
        let mut inner = self.inner.lock();
        self.prune_dispatches(&mut inner);
        inner.recent_dispatches.len()
    }

    // timestamps are pushed in order, so expired ones sit at the front
    fn prune_dispatches(&self, inner: &mut RecordInner) {
        while inner
            .recent_dispatches
            .front()
            .is_some_and(|at| at.elapsed() > self.load_window)
        {
            inner.recent_dispatches.pop_front();
        }
    }

    /// Summed cost and attempt count of ledger entries newer than `since`
    pub fn cost_since(&self, since: DateTime<Utc>) -> (f64, u64) {
        let inner = self.inner.lock();
        inner
            .cost_ledger
            .iter()
            .filter(|(at, _)| *at >= since)
            .fold((0.0, 0), |(cost, count), (_, c)| (cost + c, count + 1))
    }

    /// Compute a metrics snapshot from the current windows
    pub fn metrics(&self, circuit_state: CircuitState) -> BackendMetrics {
        let inner = self.inner.lock();
        let success_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.success_count as f64 / inner.total_requests as f64
        };

        BackendMetrics {
            backend_id: self.backend_id.clone(),
            avg_latency_ms: inner.latency_ms.mean(),
            avg_cost_per_unit: inner.cost_per_unit.mean(),
            avg_confidence: inner.confidence.mean(),
            success_rate,
            total_requests: inner.total_requests,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            total_cost: inner.total_cost,
            sample_count: inner.latency_ms.len(),
            circuit_state,
        }
    }
}

/// Aggregate cost over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub window_hours: f64,
    pub total_cost: f64,
    pub billed_attempts: u64,
    pub per_backend: HashMap<String, BackendCost>,
}

/// Cost of one backend within a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCost {
    pub cost: f64,
    pub billed_attempts: u64,

    /// Share of the window's total cost, 0 when nothing was spent
    pub share: f64,
}

/// Performance records for every registered backend
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    /// Records in registration order
    records: Vec<Arc<PerformanceRecord>>,

    index: HashMap<String, usize>,
}

impl PerformanceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend and return its record
    pub fn register(&mut self, record: PerformanceRecord) -> Arc<PerformanceRecord> {
        let record = Arc::new(record);
        self.index
            .insert(record.backend_id().to_string(), self.records.len());
        self.records.push(record.clone());
        record
    }

    /// Get the record for a backend
    pub fn get(&self, backend_id: &str) -> Option<&Arc<PerformanceRecord>> {
        self.index.get(backend_id).map(|&idx| &self.records[idx])
    }

    /// Record a completed attempt against its backend
    pub fn record(&self, response: &GenerationResponse) -> bool {
        match self.get(&response.backend_id) {
            Some(record) => {
                record.record(response);
                true
            }
            None => false,
        }
    }

    /// Summarize spend over the trailing `window_hours`
    pub fn cost_summary(&self, window_hours: f64) -> CostSummary {
        let window_hours = if window_hours.is_finite() { window_hours.max(0.0) } else { 0.0 };
        let window = ChronoDuration::milliseconds((window_hours * 3_600_000.0) as i64);
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let spend: Vec<(String, f64, u64)> = self
            .records
            .iter()
            .map(|r| {
                let (cost, attempts) = r.cost_since(since);
                (r.backend_id().to_string(), cost, attempts)
            })
            .collect();

        let total_cost: f64 = spend.iter().map(|(_, c, _)| c).sum();
        let billed_attempts = spend.iter().map(|(_, _, n)| n).sum();

        let per_backend = spend
            .into_iter()
            .map(|(id, cost, billed_attempts)| {
                let share = if total_cost > 0.0 { cost / total_cost } else { 0.0 };
                (
                    id,
                    BackendCost {
                        cost,
                        billed_attempts,
                        share,
                    },
                )
            })
            .collect();

        CostSummary {
            window_hours,
            total_cost,
            billed_attempts,
            per_backend,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BackendFailure;

    fn record(capacity: usize) -> PerformanceRecord {
        PerformanceRecord::new(
            "test",
            capacity,
            Duration::from_secs(60),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    fn ok(latency_ms: u64, cost: f64, units: u64, confidence: f64) -> GenerationResponse {
        GenerationResponse::success(
            "test",
            "out",
            units,
            Duration::from_millis(latency_ms),
            cost,
            confidence,
        )
    }

    fn failed() -> GenerationResponse {
        GenerationResponse::failure(
            "test",
            BackendFailure::Transport("reset".into()),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), Some(2.0));
    }

    #[test]
    fn test_empty_record_metrics() {
        let metrics = record(10).metrics(CircuitState::Closed);
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert!(metrics.avg_latency_ms.is_none());
        assert!(metrics.is_untested());
    }

    #[test]
    fn test_counts_stay_consistent() {
        let rec = record(10);
        rec.record(&ok(100, 1.0, 100, 0.8));
        rec.record(&failed());
        rec.record(&ok(300, 2.0, 100, 0.6));

        let metrics = rec.metrics(CircuitState::Closed);
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.success_count + metrics.failure_count, metrics.total_requests);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.avg_latency_ms, Some(200.0));
        assert!((metrics.avg_confidence.unwrap() - 0.7).abs() < 1e-9);
        assert!((metrics.avg_cost_per_unit.unwrap() - 0.015).abs() < 1e-9);
        assert!((metrics.total_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_eviction_reflected_immediately() {
        let rec = record(2);
        rec.record(&ok(1000, 0.0, 1, 0.1));
        rec.record(&ok(100, 0.0, 1, 0.5));
        rec.record(&ok(300, 0.0, 1, 0.9));

        let metrics = rec.metrics(CircuitState::Closed);
        assert_eq!(metrics.sample_count, 2);
        assert_eq!(metrics.avg_latency_ms, Some(200.0));
        assert!((metrics.avg_confidence.unwrap() - 0.7).abs() < 1e-9);
        // totals are monotonic and unaffected by eviction
        assert_eq!(metrics.total_requests, 3);
    }

    #[test]
    fn test_failures_do_not_touch_windows() {
        let rec = record(10);
        rec.record(&failed());
        let metrics = rec.metrics(CircuitState::Closed);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.sample_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_uses_expire() {
        let rec = record(10);
        rec.mark_dispatched();
        rec.mark_dispatched();
        assert_eq!(rec.recent_uses(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(rec.recent_uses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_uses_not_bounded_by_window_capacity() {
        let rec = record(3);
        for _ in 0..10 {
            rec.mark_dispatched();
        }
        assert_eq!(rec.recent_uses(), 10);

        tokio::time::advance(Duration::from_secs(30)).await;
        rec.mark_dispatched();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(rec.recent_uses(), 1);
    }

    #[test]
    fn test_unbounded_retention_keeps_ledger() {
        let rec = PerformanceRecord::new(
            "test",
            10,
            Duration::from_secs(60),
            Duration::from_secs(u64::MAX),
        );
        rec.record(&ok(100, 2.0, 10, 0.8));

        let (cost, count) = rec.cost_since(Utc::now() - ChronoDuration::hours(1));
        assert_eq!(cost, 2.0);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_only_backend_is_not_untested() {
        let rec = record(10);
        rec.record(&failed());

        let metrics = rec.metrics(CircuitState::Closed);
        assert_eq!(metrics.sample_count, 0);
        assert!(!metrics.is_untested());
    }

    #[test]
    fn test_cost_summary_window() {
        let mut tracker = PerformanceTracker::new();
        let a = tracker.register(PerformanceRecord::new(
            "a",
            10,
            Duration::from_secs(60),
            Duration::from_secs(7 * 24 * 3600),
        ));
        tracker.register(PerformanceRecord::new(
            "b",
            10,
            Duration::from_secs(60),
            Duration::from_secs(7 * 24 * 3600),
        ));

        let mut stale = GenerationResponse::success("a", "x", 10, Duration::ZERO, 5.0, 0.5);
        stale.timestamp = Utc::now() - ChronoDuration::hours(3);
        a.record(&stale);

        assert!(tracker.record(&GenerationResponse::success("a", "x", 10, Duration::ZERO, 1.0, 0.5)));
        assert!(tracker.record(&GenerationResponse::success("b", "x", 10, Duration::ZERO, 3.0, 0.5)));
        assert!(!tracker.record(&GenerationResponse::success("zzz", "x", 10, Duration::ZERO, 3.0, 0.5)));

        let summary = tracker.cost_summary(1.0);
        assert!((summary.total_cost - 4.0).abs() < 1e-9);
        assert_eq!(summary.billed_attempts, 2);
        assert!((summary.per_backend["a"].cost - 1.0).abs() < 1e-9);
        assert!((summary.per_backend["b"].share - 0.75).abs() < 1e-9);

        let wide = tracker.cost_summary(24.0);
        assert!((wide.total_cost - 9.0).abs() < 1e-9);

        let unbounded = tracker.cost_summary(f64::MAX);
        assert!((unbounded.total_cost - 9.0).abs() < 1e-9);
    }
}
