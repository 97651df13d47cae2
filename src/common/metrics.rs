//! Metrics collection for the coordination layer
//!
//! Counters for the write protocol, routing changes and backups, plus a
//! commit latency histogram. Rendered either as a JSON document grouped by
//! role (`GetMetrics`) or as Prometheus text.

use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Roles reported by [`MetricsRegistry::to_json`]
pub const METRIC_ROLES: [&str; 3] = ["coordinator", "executor", "backup"];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(upper bound, count)` pairs, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            let bound = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            result.push((bound, cumulative));
        }
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

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
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics registry for one coordinator process
#[derive(Debug)]
pub struct MetricsRegistry {
    // Write protocol
    pub commits_total: Counter,
    pub commits_rejected: Counter,
    pub requests_written: Counter,
    pub last_snapshot_id: Gauge,
    pub commit_latency: Histogram,
    pub flushes_total: Counter,
    pub flush_timeouts: Counter,
    pub commits_in_doubt: Gauge,
    pub commits_redelivered: Counter,

    // Routing
    pub routing_updates_applied: Counter,
    pub routing_updates_stale: Counter,
    pub membership_events: Counter,
    pub live_nodes: Gauge,

    // Backups
    pub backups_created: Counter,
    pub backups_failed: Counter,
    pub backups_restored: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            commits_total: Counter::new(),
            commits_rejected: Counter::new(),
            requests_written: Counter::new(),
            last_snapshot_id: Gauge::new(),
            commit_latency: Histogram::new(),
            flushes_total: Counter::new(),
            flush_timeouts: Counter::new(),
            commits_in_doubt: Gauge::new(),
            commits_redelivered: Counter::new(),
            routing_updates_applied: Counter::new(),
            routing_updates_stale: Counter::new(),
            membership_events: Counter::new(),
            live_nodes: Gauge::new(),
            backups_created: Counter::new(),
            backups_failed: Counter::new(),
            backups_restored: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one batch commit
    pub fn record_commit(&self, duration: Duration, requests: usize, success: bool) {
        self.commit_latency
            .observe(duration.as_secs_f64() * 1000.0);
        if success {
            self.commits_total.inc();
            self.requests_written.add(requests as u64);
        } else {
            self.commits_rejected.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn role_section(&self, role: &str) -> Option<Value> {
        match role {
            "coordinator" => Some(json!({
                "commits_total": self.commits_total.get(),
                "commits_rejected": self.commits_rejected.get(),
                "requests_written": self.requests_written.get(),
                "last_snapshot_id": self.last_snapshot_id.get(),
                "commit_latency_ms_sum": self.commit_latency.sum(),
                "commit_latency_count": self.commit_latency.count(),
                "flushes_total": self.flushes_total.get(),
                "flush_timeouts": self.flush_timeouts.get(),
                "commits_in_doubt": self.commits_in_doubt.get(),
                "commits_redelivered": self.commits_redelivered.get(),
            })),
            "executor" => Some(json!({
                "routing_updates_applied": self.routing_updates_applied.get(),
                "routing_updates_stale": self.routing_updates_stale.get(),
                "membership_events": self.membership_events.get(),
                "live_nodes": self.live_nodes.get(),
            })),
            "backup" => Some(json!({
                "backups_created": self.backups_created.get(),
                "backups_failed": self.backups_failed.get(),
                "backups_restored": self.backups_restored.get(),
            })),
            _ => None,
        }
    }

    /// Metrics grouped by role.
    ///
    /// `roles` is a comma-separated list; empty or `all` selects every role.
    /// Unknown role names are skipped.
    pub fn to_json(&self, roles: &str) -> Value {
        let selected: Vec<&str> = roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect();
        let all = selected.is_empty() || selected.contains(&"all");

        let mut out = Map::new();
        out.insert("uptime_seconds".into(), json!(self.uptime_seconds()));
        for role in METRIC_ROLES {
            if all || selected.contains(&role) {
                if let Some(section) = self.role_section(role) {
                    out.insert(role.to_string(), section);
                }
            }
        }
        Value::Object(out)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, u64); 12] = [
            ("minigraph_commits_total", "Committed batches", self.commits_total.get()),
            ("minigraph_commits_rejected_total", "Rejected batches", self.commits_rejected.get()),
            ("minigraph_requests_written_total", "Write requests committed", self.requests_written.get()),
            ("minigraph_flushes_total", "Successful remote flushes", self.flushes_total.get()),
            ("minigraph_flush_timeouts_total", "Remote flushes that timed out", self.flush_timeouts.get()),
            ("minigraph_commits_redelivered_total", "In-doubt commits delivered late", self.commits_redelivered.get()),
            ("minigraph_routing_updates_applied_total", "Accepted routing updates", self.routing_updates_applied.get()),
            ("minigraph_routing_updates_stale_total", "Dropped stale routing updates", self.routing_updates_stale.get()),
            ("minigraph_membership_events_total", "Processed membership events", self.membership_events.get()),
            ("minigraph_backups_created_total", "Completed backups", self.backups_created.get()),
            ("minigraph_backups_failed_total", "Failed backups", self.backups_failed.get()),
            ("minigraph_backups_restored_total", "Restored backups", self.backups_restored.get()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let gauges: [(&str, &str, u64); 4] = [
            ("minigraph_last_snapshot_id", "Last committed snapshot id", self.last_snapshot_id.get()),
            ("minigraph_commits_in_doubt", "Durable snapshots not yet delivered to every owner", self.commits_in_doubt.get()),
            ("minigraph_live_nodes", "Live storage nodes", self.live_nodes.get()),
            ("minigraph_uptime_seconds", "Server uptime in seconds", self.uptime_seconds()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP minigraph_commit_duration_ms Batch commit duration in milliseconds\n");
        out.push_str("# TYPE minigraph_commit_duration_ms histogram\n");
        for (le, count) in self.commit_latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "minigraph_commit_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(out, "minigraph_commit_duration_ms_bucket{{le=\"{}\"}} {}", le, count);
            }
        }
        let _ = writeln!(out, "minigraph_commit_duration_ms_sum {}", self.commit_latency.sum());
        let _ = writeln!(out, "minigraph_commit_duration_ms_count {}", self.commit_latency.count());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        assert_eq!(buckets.last().unwrap().1, 3);
        assert!(buckets.last().unwrap().0.is_infinite());
    }

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);

        let gauge = Gauge::new();
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_record_commit() {
        let registry = MetricsRegistry::new();
        registry.record_commit(Duration::from_millis(3), 10, true);
        registry.record_commit(Duration::from_millis(3), 4, false);

        assert_eq!(registry.commits_total.get(), 1);
        assert_eq!(registry.commits_rejected.get(), 1);
        assert_eq!(registry.requests_written.get(), 10);
        assert_eq!(registry.commit_latency.count(), 2);
    }

    #[test]
    fn test_to_json_filters_roles() {
        let registry = MetricsRegistry::new();
        registry.routing_updates_applied.inc();

        let all = registry.to_json("");
        assert!(all.get("coordinator").is_some());
        assert!(all.get("executor").is_some());
        assert!(all.get("backup").is_some());

        let some = registry.to_json("executor, unknown");
        assert!(some.get("coordinator").is_none());
        assert_eq!(some["executor"]["routing_updates_applied"], 1);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.record_commit(Duration::from_millis(1), 1, true);
        let text = registry.to_prometheus();
        assert!(text.contains("minigraph_commits_total 1"));
        assert!(text.contains("minigraph_commit_duration_ms_bucket{le=\"+Inf\"} 1"));
    }
}
