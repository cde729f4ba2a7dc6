//! Prometheus metrics registry for irsync
//!
//! Provides typed, labeled counters, gauges, and histograms for the sync
//! pipeline, the change queue, and the conflict system.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Central metrics registry holding all Prometheus metrics.
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: sync operations by (side, status)
    pub sync_operations_total: IntCounterVec,
    /// Counter: conflicts by event (detected, resolved strategy)
    pub conflicts_total: IntCounterVec,
    /// Counter: queue entries evicted on overflow, by priority
    pub queue_evictions_total: IntCounterVec,
    /// Gauge: operations currently in flight
    pub operations_in_flight: IntGauge,
    /// Histogram: duration of one sync operation in seconds
    pub sync_duration_seconds: HistogramVec,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("irsync".to_string()), None)?;

        let sync_operations_total = IntCounterVec::new(
            Opts::new("sync_operations_total", "Total sync operations"),
            &["side", "status"],
        )?;
        registry.register(Box::new(sync_operations_total.clone()))?;

        let conflicts_total = IntCounterVec::new(
            Opts::new("conflicts_total", "Conflicts detected and resolved"),
            &["event"],
        )?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let queue_evictions_total = IntCounterVec::new(
            Opts::new(
                "queue_evictions_total",
                "Queued changes dropped because the queue was full",
            ),
            &["priority"],
        )?;
        registry.register(Box::new(queue_evictions_total.clone()))?;

        let operations_in_flight = IntGauge::new(
            "operations_in_flight",
            "Sync operations started but not yet finished",
        )?;
        registry.register(Box::new(operations_in_flight.clone()))?;

        let sync_duration_seconds = HistogramVec::new(
            HistogramOpts::new("sync_duration_seconds", "Sync operation duration in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["side"],
        )?;
        registry.register(Box::new(sync_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            sync_operations_total,
            conflicts_total,
            queue_evictions_total,
            operations_in_flight,
            sync_duration_seconds,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record a sync operation outcome.
    pub fn record_sync_operation(&self, side: &str, status: &str) {
        self.sync_operations_total
            .with_label_values(&[side, status])
            .inc();
    }

    /// Record a conflict event (`detected`, or the strategy that resolved it).
    pub fn record_conflict(&self, event: &str) {
        self.conflicts_total.with_label_values(&[event]).inc();
    }

    pub fn record_queue_eviction(&self, priority: &str) {
        self.queue_evictions_total
            .with_label_values(&[priority])
            .inc();
    }

    pub fn set_in_flight(&self, count: i64) {
        self.operations_in_flight.set(count);
    }

    /// Observe the duration of one sync operation.
    pub fn observe_sync_duration(&self, side: &str, duration_secs: f64) {
        self.sync_duration_seconds
            .with_label_values(&[side])
            .observe(duration_secs);
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new().expect("create registry");
        let output = registry.encode().expect("encode");
        assert!(output.is_empty() || output.contains("irsync"));
    }

    #[test]
    fn test_record_sync_operation() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record_sync_operation("a", "completed");
        registry.record_sync_operation("a", "completed");
        registry.record_sync_operation("b", "failed");

        let output = registry.encode().unwrap();
        assert!(output.contains("irsync_sync_operations_total"));
        assert!(output.contains("side=\"a\",status=\"completed\"} 2"));
        assert!(output.contains("side=\"b\",status=\"failed\"} 1"));
    }

    #[test]
    fn test_record_conflict_and_eviction() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record_conflict("detected");
        registry.record_conflict("keep_a");
        registry.record_queue_eviction("low");

        let output = registry.encode().unwrap();
        assert!(output.contains("irsync_conflicts_total"));
        assert!(output.contains("irsync_queue_evictions_total{priority=\"low\"} 1"));
    }

    #[test]
    fn test_observe_sync_duration() {
        let registry = MetricsRegistry::new().unwrap();
        registry.observe_sync_duration("b", 0.2);
        registry.set_in_flight(3);

        let output = registry.encode().unwrap();
        assert!(output.contains("irsync_sync_duration_seconds"));
        assert!(output.contains("irsync_operations_in_flight 3"));
    }
}
