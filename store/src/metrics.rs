//! Prometheus metrics for the store adapter.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Container for all store metrics. Counter names are stable; alerting
/// thresholds are applied by the observer, not here.
pub struct StoreMetrics {
    registry: Registry,

    /// Counter of series requests served.
    pub series_requests_total: Counter,

    /// Counter of series frames sent to sinks.
    pub series_frames_sent_total: Counter,

    /// Counter of warning frames sent under the warn strategy.
    pub series_warnings_total: Counter,

    /// Counter of label-names and label-values requests served.
    pub label_queries_total: Counter,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let series_requests_total = Counter::default();
        registry.register(
            "store_series_requests_total",
            "Total number of series requests served",
            series_requests_total.clone(),
        );

        let series_frames_sent_total = Counter::default();
        registry.register(
            "store_series_frames_sent_total",
            "Total number of series frames sent to sinks",
            series_frames_sent_total.clone(),
        );

        let series_warnings_total = Counter::default();
        registry.register(
            "store_series_warnings_total",
            "Total number of warning frames sent",
            series_warnings_total.clone(),
        );

        let label_queries_total = Counter::default();
        registry.register(
            "store_label_queries_total",
            "Total number of label names/values requests served",
            label_queries_total.clone(),
        );

        Self {
            registry,
            series_requests_total,
            series_frames_sent_total,
            series_warnings_total,
            label_queries_total,
        }
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("encoding metrics should not fail");
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_register_all_store_metrics() {
        // given/when
        let metrics = StoreMetrics::new();

        // then
        let encoded = metrics.encode();
        assert!(encoded.contains("# HELP store_series_requests_total"));
        assert!(encoded.contains("# HELP store_series_frames_sent_total"));
        assert!(encoded.contains("# HELP store_series_warnings_total"));
        assert!(encoded.contains("# HELP store_label_queries_total"));
    }
}
