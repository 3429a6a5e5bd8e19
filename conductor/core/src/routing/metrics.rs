//! Performance Monitor
//!
//! Observability for the routing system including:
//! - Per-model outcome history in fixed-capacity ring buffers
//! - Derived latency percentiles and error rates (computed on read)
//! - Per-tool call counts, latency and error rates
//! - Global request counters and uptime
//!
//! Writes to one model's ring are serialized by that model's mutex, so
//! concurrent `end_invocation` calls never lose or duplicate a record.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::config::PerformanceConfig;
use crate::error::ErrorKind;

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// A gauge (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturating: a reset while requests are in flight must not wrap
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Ring Buffer
// ============================================================================

/// One recorded invocation outcome
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutcomeRecord {
    /// Wall-clock latency of the attempt
    pub latency_ms: u64,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Failure classification, if it failed
    pub error_kind: Option<ErrorKind>,
}

impl OutcomeRecord {
    pub fn success(latency: Duration) -> Self {
        Self {
            latency_ms: duration_ms(latency),
            success: true,
            error_kind: None,
        }
    }

    pub fn failure(latency: Duration, kind: ErrorKind) -> Self {
        Self {
            latency_ms: duration_ms(latency),
            success: false,
            error_kind: Some(kind),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Fixed-capacity FIFO of a model's recent outcomes
#[derive(Debug)]
pub struct PerformanceRecord {
    capacity: usize,
    entries: VecDeque<OutcomeRecord>,
    total_recorded: u64,
}

impl PerformanceRecord {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            total_recorded: 0,
        }
    }

    /// Append an outcome, evicting the oldest at capacity
    pub fn push(&mut self, record: OutcomeRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
        self.total_recorded += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Outcomes ever recorded, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Derive stats from the current window
    pub fn stats(&self) -> PerformanceStats {
        let mut latencies: Vec<u64> = self
            .entries
            .iter()
            .filter(|r| r.success)
            .map(|r| r.latency_ms)
            .collect();
        latencies.sort_unstable();

        let sample_count = self.entries.len();
        let success_count = latencies.len();
        #[allow(clippy::cast_precision_loss)]
        let error_rate = if sample_count == 0 {
            0.0
        } else {
            (sample_count - success_count) as f64 / sample_count as f64
        };

        PerformanceStats {
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
            error_rate,
            sample_count,
            success_count,
        }
    }
}

/// Nearest-rank percentile over sorted values
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted.get(rank.clamp(1, sorted.len()) - 1).copied()
}

/// Aggregated statistics for one model
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Median latency of successful calls
    pub p50_ms: Option<u64>,
    /// 95th percentile latency of successful calls
    pub p95_ms: Option<u64>,
    /// Failed fraction of the window
    pub error_rate: f64,
    /// Outcomes in the window
    pub sample_count: usize,
    /// Successful outcomes in the window
    pub success_count: usize,
}

// ============================================================================
// Handles
// ============================================================================

/// An in-flight invocation. Pass it back to `end_invocation`; dropping it
/// without doing so only releases the active-invocation gauge.
#[derive(Debug)]
pub struct InvocationHandle {
    model_id: String,
    tool: Option<String>,
    started_at: tokio::time::Instant,
    active: Arc<Gauge>,
}

impl InvocationHandle {
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for InvocationHandle {
    fn drop(&mut self) {
        self.active.dec();
    }
}

/// Tracks one top-level request (`ask` / `orchestrate`) for system metrics
#[derive(Debug)]
pub struct RequestGuard {
    active: Arc<Gauge>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active.dec();
    }
}

// ============================================================================
// Tool Metrics
// ============================================================================

#[derive(Debug, Default)]
struct ToolCounters {
    count: Counter,
    errors: Counter,
    latency_ms_total: Counter,
}

/// Per-tool aggregate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolStats {
    pub count: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
}

/// Snapshot of all tool aggregates
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ToolMetrics {
    pub per_tool: BTreeMap<String, ToolStats>,
}

/// Snapshot of process-level counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub uptime_seconds: u64,
    pub active_requests: u64,
    pub total_requests: u64,
    pub active_invocations: u64,
    pub total_invocations: u64,
    pub total_fallbacks: u64,
    pub total_budget_rejections: u64,
}

// ============================================================================
// Performance Monitor
// ============================================================================

/// Centralized performance history for the router
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,

    /// Per-model ring buffers
    records: DashMap<String, Arc<Mutex<PerformanceRecord>>>,

    /// Per-tool aggregates
    tools: DashMap<String, Arc<ToolCounters>>,

    pub total_requests: Counter,
    active_requests: Arc<Gauge>,
    pub total_invocations: Counter,
    active_invocations: Arc<Gauge>,
    pub total_fallbacks: Counter,
    pub total_budget_rejections: Counter,

    /// When metrics collection started
    started_at: Instant,
}

impl PerformanceMonitor {
    /// Create a new monitor
    #[must_use]
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            tools: DashMap::new(),
            total_requests: Counter::new(),
            active_requests: Arc::new(Gauge::new()),
            total_invocations: Counter::new(),
            active_invocations: Arc::new(Gauge::new()),
            total_fallbacks: Counter::new(),
            total_budget_rejections: Counter::new(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    fn record_for(&self, model_id: &str) -> Arc<Mutex<PerformanceRecord>> {
        if let Some(existing) = self.records.get(model_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.records
                .entry(model_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(PerformanceRecord::new(
                        self.config.window_capacity,
                    )))
                })
                .value(),
        )
    }

    /// Begin tracking a top-level request
    #[must_use]
    pub fn begin_request(&self) -> RequestGuard {
        self.total_requests.inc();
        self.active_requests.inc();
        RequestGuard {
            active: Arc::clone(&self.active_requests),
        }
    }

    /// Begin tracking one provider attempt
    #[must_use]
    pub fn start_invocation(&self, model_id: &str, tool: Option<&str>) -> InvocationHandle {
        self.total_invocations.inc();
        self.active_invocations.inc();
        InvocationHandle {
            model_id: model_id.to_string(),
            tool: tool.map(String::from),
            started_at: tokio::time::Instant::now(),
            active: Arc::clone(&self.active_invocations),
        }
    }

    /// Finish tracking an attempt; latency is measured from `start_invocation`
    pub fn end_invocation(&self, handle: InvocationHandle, error: Option<ErrorKind>) {
        let latency = handle.elapsed();
        let record = match error {
            None => OutcomeRecord::success(latency),
            Some(kind) => OutcomeRecord::failure(latency, kind),
        };

        if let Some(tool) = handle.tool.as_deref() {
            self.record_tool(tool, &record);
        }
        self.record(&handle.model_id, record);
    }

    /// Append an outcome to a model's ring directly
    pub fn record(&self, model_id: &str, record: OutcomeRecord) {
        let ring = self.record_for(model_id);
        ring.lock().push(record);
    }

    /// Count one execution of a tool
    pub fn record_tool_call(&self, tool: &str, latency: Duration, success: bool) {
        self.record_tool(
            tool,
            &OutcomeRecord {
                latency_ms: duration_ms(latency),
                success,
                error_kind: None,
            },
        );
    }

    fn record_tool(&self, tool: &str, record: &OutcomeRecord) {
        let counters = Arc::clone(
            self.tools
                .entry(tool.to_string())
                .or_insert_with(|| Arc::new(ToolCounters::default()))
                .value(),
        );
        counters.count.inc();
        counters.latency_ms_total.add(record.latency_ms);
        if !record.success {
            counters.errors.inc();
        }
    }

    /// Record a fallback from one model to the next
    pub fn record_fallback(&self, from_model: &str, to_model: &str) {
        self.total_fallbacks.inc();
        tracing::debug!(
            from = from_model,
            to = to_model,
            "Request fell back to alternate model"
        );
    }

    /// Record a request rejected for budget before any call
    pub fn record_budget_rejection(&self) {
        self.total_budget_rejections.inc();
    }

    /// Stats for a model (all zero when never seen)
    #[must_use]
    pub fn stats(&self, model_id: &str) -> PerformanceStats {
        self.records
            .get(model_id)
            .map(|ring| ring.lock().stats())
            .unwrap_or_default()
    }

    /// Historical reliability in [0, 1]; the configured default with no history
    #[must_use]
    pub fn reliability(&self, model_id: &str) -> f64 {
        let stats = self.stats(model_id);
        if stats.sample_count == 0 {
            self.config.default_reliability
        } else {
            1.0 - stats.error_rate
        }
    }

    /// Whether a model's recent error rate exceeds the demotion threshold
    #[must_use]
    pub fn is_degraded(&self, model_id: &str) -> bool {
        let stats = self.stats(model_id);
        stats.sample_count >= self.config.min_samples
            && stats.error_rate > self.config.error_rate_threshold
    }

    /// Current ring length for a model
    #[must_use]
    pub fn record_len(&self, model_id: &str) -> usize {
        self.records.get(model_id).map_or(0, |r| r.lock().len())
    }

    /// Outcomes ever recorded for a model
    #[must_use]
    pub fn total_recorded(&self, model_id: &str) -> u64 {
        self.records
            .get(model_id)
            .map_or(0, |r| r.lock().total_recorded())
    }

    /// Get uptime
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Process-level counters
    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        SystemMetrics {
            uptime_seconds: self.uptime().as_secs(),
            active_requests: self.active_requests.get(),
            total_requests: self.total_requests.get(),
            active_invocations: self.active_invocations.get(),
            total_invocations: self.total_invocations.get(),
            total_fallbacks: self.total_fallbacks.get(),
            total_budget_rejections: self.total_budget_rejections.get(),
        }
    }

    /// Per-tool aggregates
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tool_metrics(&self) -> ToolMetrics {
        let per_tool = self
            .tools
            .iter()
            .map(|entry| {
                let c = entry.value();
                let count = c.count.get();
                let stats = if count == 0 {
                    ToolStats {
                        count,
                        average_latency_ms: 0.0,
                        error_rate: 0.0,
                    }
                } else {
                    ToolStats {
                        count,
                        average_latency_ms: c.latency_ms_total.get() as f64 / count as f64,
                        error_rate: c.errors.get() as f64 / count as f64,
                    }
                };
                (entry.key().clone(), stats)
            })
            .collect();
        ToolMetrics { per_tool }
    }

    /// Clear all history and counters. Uptime and in-flight gauges are kept.
    pub fn reset(&self) {
        self.records.clear();
        self.tools.clear();
        self.total_requests.reset();
        self.total_invocations.reset();
        self.total_fallbacks.reset();
        self.total_budget_rejections.reset();
    }

    /// Export as Prometheus format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let system = self.system_metrics();

        let _ = write!(
            output,
            "# HELP conductor_requests_total Top-level requests received\n\
             # TYPE conductor_requests_total counter\n\
             conductor_requests_total {}\n\n\
             # HELP conductor_active_requests Requests currently in flight\n\
             # TYPE conductor_active_requests gauge\n\
             conductor_active_requests {}\n\n\
             # HELP conductor_invocations_total Provider attempts started\n\
             # TYPE conductor_invocations_total counter\n\
             conductor_invocations_total {}\n\n\
             # HELP conductor_fallbacks_total Fallbacks to an alternate model\n\
             # TYPE conductor_fallbacks_total counter\n\
             conductor_fallbacks_total {}\n\n\
             # HELP conductor_budget_rejections_total Requests rejected for budget\n\
             # TYPE conductor_budget_rejections_total counter\n\
             conductor_budget_rejections_total {}\n\n",
            system.total_requests,
            system.active_requests,
            system.total_invocations,
            system.total_fallbacks,
            system.total_budget_rejections,
        );

        let mut models: Vec<_> = self
            .records
            .iter()
            .map(|entry| {
                let ring = entry.value().lock();
                (entry.key().clone(), ring.total_recorded(), ring.stats())
            })
            .collect();
        models.sort_by(|a, b| a.0.cmp(&b.0));

        if !models.is_empty() {
            output.push_str(
                "# HELP model_invocations_total Attempts recorded per model\n\
                 # TYPE model_invocations_total counter\n",
            );
        }
        for (model_id, total, stats) in &models {
            let _ = writeln!(output, "model_invocations_total{{model=\"{model_id}\"}} {total}");
            let _ = writeln!(
                output,
                "model_error_rate{{model=\"{model_id}\"}} {:.4}",
                stats.error_rate
            );
            if let Some(p50) = stats.p50_ms {
                let _ = writeln!(output, "model_latency_p50_ms{{model=\"{model_id}\"}} {p50}");
            }
            if let Some(p95) = stats.p95_ms {
                let _ = writeln!(output, "model_latency_p95_ms{{model=\"{model_id}\"}} {p95}");
            }
        }

        for (tool, stats) in &self.tool_metrics().per_tool {
            let _ = writeln!(output, "tool_calls_total{{tool=\"{tool}\"}} {}", stats.count);
            let _ = writeln!(
                output,
                "tool_error_rate{{tool=\"{tool}\"}} {:.4}",
                stats.error_rate
            );
        }

        output
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_capacity(capacity: usize) -> PerformanceMonitor {
        PerformanceMonitor::new(PerformanceConfig {
            window_capacity: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_ring_length_is_bounded() {
        let monitor = monitor_with_capacity(10);
        for i in 0..25 {
            monitor.record("model-a", OutcomeRecord::success(Duration::from_millis(i)));
            let expected = usize::try_from(i + 1).unwrap().min(10);
            assert_eq!(monitor.record_len("model-a"), expected);
        }
        assert_eq!(monitor.total_recorded("model-a"), 25);
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut ring = PerformanceRecord::new(3);
        for ms in [10, 20, 30, 40] {
            ring.push(OutcomeRecord::success(Duration::from_millis(ms)));
        }
        let stats = ring.stats();
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.p50_ms, Some(30));
    }

    #[test]
    fn test_percentiles() {
        let monitor = PerformanceMonitor::default();
        for ms in 1..=100 {
            monitor.record("model-a", OutcomeRecord::success(Duration::from_millis(ms)));
        }

        let stats = monitor.stats("model-a");
        assert_eq!(stats.p50_ms, Some(50));
        assert_eq!(stats.p95_ms, Some(95));
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.success_count, 100);
    }

    #[test]
    fn test_error_rate_and_reliability() {
        let monitor = PerformanceMonitor::default();
        assert!((monitor.reliability("unknown") - 0.8).abs() < f64::EPSILON);

        monitor.record("model-a", OutcomeRecord::success(Duration::from_millis(100)));
        monitor.record(
            "model-a",
            OutcomeRecord::failure(Duration::from_millis(5), ErrorKind::Transient),
        );

        let stats = monitor.stats("model-a");
        assert!((stats.error_rate - 0.5).abs() < 0.01);
        // Failed latencies don't skew percentiles
        assert_eq!(stats.p50_ms, Some(100));
        assert!((monitor.reliability("model-a") - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_degraded_needs_min_samples() {
        let monitor = PerformanceMonitor::default();
        for _ in 0..4 {
            monitor.record(
                "flaky",
                OutcomeRecord::failure(Duration::ZERO, ErrorKind::Transient),
            );
        }
        assert!(!monitor.is_degraded("flaky"));

        monitor.record(
            "flaky",
            OutcomeRecord::failure(Duration::ZERO, ErrorKind::Transient),
        );
        assert!(monitor.is_degraded("flaky"));
    }

    #[tokio::test]
    async fn test_invocation_handles_track_active_and_tools() {
        let monitor = PerformanceMonitor::default();

        let first = monitor.start_invocation("model-a", Some("summarize"));
        let second = monitor.start_invocation("model-b", Some("summarize"));
        assert_eq!(monitor.system_metrics().active_invocations, 2);

        monitor.end_invocation(first, None);
        monitor.end_invocation(second, Some(ErrorKind::Permanent));

        let system = monitor.system_metrics();
        assert_eq!(system.active_invocations, 0);
        assert_eq!(system.total_invocations, 2);

        let tools = monitor.tool_metrics();
        let summarize = &tools.per_tool["summarize"];
        assert_eq!(summarize.count, 2);
        assert!((summarize.error_rate - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_request_guard() {
        let monitor = PerformanceMonitor::default();
        {
            let _guard = monitor.begin_request();
            assert_eq!(monitor.system_metrics().active_requests, 1);
        }
        let system = monitor.system_metrics();
        assert_eq!(system.active_requests, 0);
        assert_eq!(system.total_requests, 1);
    }

    #[test]
    fn test_reset_clears_history() {
        let monitor = PerformanceMonitor::default();
        monitor.record("model-a", OutcomeRecord::success(Duration::from_millis(1)));
        monitor.record_fallback("model-a", "model-b");
        monitor.reset();

        assert_eq!(monitor.record_len("model-a"), 0);
        assert_eq!(monitor.system_metrics().total_fallbacks, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let monitor = PerformanceMonitor::default();
        monitor.record("model-a", OutcomeRecord::success(Duration::from_millis(42)));

        let text = monitor.to_prometheus();
        assert!(text.contains("# TYPE conductor_requests_total counter"));
        assert!(text.contains("model_invocations_total{model=\"model-a\"} 1"));
        assert!(text.contains("model_latency_p50_ms{model=\"model-a\"} 42"));
    }
}
