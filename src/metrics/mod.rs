// Private module declaration
mod server;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the event repository
// ============================================================================
//
// Tracks, per aggregate:
// - events appended and appends rejected by a sequence conflict
// - store failures by operation (append / list)
// - events returned by list and how long the full retrieval took
//
// Scraped via /metrics (see server.rs).
// ============================================================================

pub struct RepositoryMetrics {
    registry: Registry,

    pub events_appended: IntCounterVec,
    pub append_conflicts: IntCounterVec,
    pub store_errors: IntCounterVec,
    pub events_listed: IntCounterVec,
    pub list_duration: HistogramVec,
}

impl RepositoryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the repository metrics into an existing registry.
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let events_appended = IntCounterVec::new(
            Opts::new("eventstore_events_appended_total", "Events durably appended"),
            &["aggregate"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let append_conflicts = IntCounterVec::new(
            Opts::new(
                "eventstore_append_conflicts_total",
                "Appends rejected because the sequence number was taken",
            ),
            &["aggregate"],
        )?;
        registry.register(Box::new(append_conflicts.clone()))?;

        let store_errors = IntCounterVec::new(
            Opts::new("eventstore_store_errors_total", "Backing store failures"),
            &["aggregate", "operation"],
        )?;
        registry.register(Box::new(store_errors.clone()))?;

        let events_listed = IntCounterVec::new(
            Opts::new("eventstore_events_listed_total", "Events returned by list"),
            &["aggregate"],
        )?;
        registry.register(Box::new(events_listed.clone()))?;

        let list_duration = HistogramVec::new(
            HistogramOpts::new("eventstore_list_duration_seconds", "Full stream retrieval duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["aggregate"],
        )?;
        registry.register(Box::new(list_duration.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            append_conflicts,
            store_errors,
            events_listed,
            list_duration,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Everything in the registry, in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn record_append(&self, aggregate: &str) {
        self.events_appended.with_label_values(&[aggregate]).inc();
    }

    pub fn record_conflict(&self, aggregate: &str) {
        self.append_conflicts.with_label_values(&[aggregate]).inc();
    }

    pub fn record_store_error(&self, aggregate: &str, operation: &str) {
        self.store_errors.with_label_values(&[aggregate, operation]).inc();
    }

    pub fn record_list(&self, aggregate: &str, events: usize, duration_secs: f64) {
        self.events_listed.with_label_values(&[aggregate]).inc_by(events as u64);
        self.list_duration.with_label_values(&[aggregate]).observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(metrics: &RepositoryMetrics, name: &str) -> Option<f64> {
        let gathered = metrics.registry().gather();
        let family = gathered.iter().find(|m| m.name() == name)?;
        family.metric[0].counter.value
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = RepositoryMetrics::new().unwrap();
        metrics.record_append("book");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_append_and_conflict() {
        let metrics = RepositoryMetrics::new().unwrap();
        metrics.record_append("book");
        metrics.record_append("book");
        metrics.record_conflict("book");

        assert_eq!(counter(&metrics, "eventstore_events_appended_total"), Some(2.0));
        assert_eq!(counter(&metrics, "eventstore_append_conflicts_total"), Some(1.0));
    }

    #[test]
    fn test_store_errors_labelled_by_operation() {
        let metrics = RepositoryMetrics::new().unwrap();
        metrics.record_store_error("book", "append");
        metrics.record_store_error("book", "list");

        let gathered = metrics.registry().gather();
        let errors = gathered
            .iter()
            .find(|m| m.name() == "eventstore_store_errors_total")
            .unwrap();
        assert_eq!(errors.metric.len(), 2);
    }

    #[test]
    fn test_record_list_counts_events() {
        let metrics = RepositoryMetrics::new().unwrap();
        metrics.record_list("book", 3, 0.002);

        assert_eq!(counter(&metrics, "eventstore_events_listed_total"), Some(3.0));
    }

    #[test]
    fn test_encode_renders_labelled_samples() {
        let metrics = RepositoryMetrics::new().unwrap();
        metrics.record_append("book");
        metrics.record_store_error("author", "list");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("eventstore_events_appended_total{aggregate=\"book\"} 1"));
        assert!(text.contains(
            "eventstore_store_errors_total{aggregate=\"author\",operation=\"list\"} 1"
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        RepositoryMetrics::with_registry(registry.clone()).unwrap();
        assert!(RepositoryMetrics::with_registry(registry).is_err());
    }
}
