//! Metrics sink seam.
//!
//! The publishing backend is an external collaborator; the harness only
//! needs `set_dimensions` once per trial and `put_metric` once per data
//! point. [`LogSink`] emits structured tracing events, which is enough for
//! local runs and log-scraping pipelines; [`RecordingSink`] captures calls
//! for assertions in tests.

use std::collections::BTreeMap;
use tracing::info;

/// Receives scalar data points tagged with trial dimensions.
pub trait MetricsSink {
    /// Replace the dimension set attached to subsequent data points.
    fn set_dimensions(&mut self, dimensions: BTreeMap<String, String>);

    /// Emit one scalar data point.
    fn put_metric(&mut self, name: &str, value: f64, unit: &str);
}

/// Sink that emits each data point as a structured tracing event.
#[derive(Debug, Default)]
pub struct LogSink {
    dimensions: BTreeMap<String, String>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for LogSink {
    fn set_dimensions(&mut self, dimensions: BTreeMap<String, String>) {
        self.dimensions = dimensions;
    }

    fn put_metric(&mut self, name: &str, value: f64, unit: &str) {
        let dimensions = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        info!(target: "blockbench::metrics", metric = name, value, unit, %dimensions, "data point");
    }
}

/// Sink that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub dimensions: BTreeMap<String, String>,
    pub metrics: Vec<(String, f64, String)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded values for a given metric name, in emission order.
    pub fn values_of(&self, name: &str) -> Vec<f64> {
        self.metrics
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn set_dimensions(&mut self, dimensions: BTreeMap<String, String>) {
        self.dimensions = dimensions;
    }

    fn put_metric(&mut self, name: &str, value: f64, unit: &str) {
        self.metrics
            .push((name.to_string(), value, unit.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_order_and_units() {
        let mut sink = RecordingSink::new();
        sink.put_metric("bw_read", 300.0, "Kilobytes/Second");
        sink.put_metric("bw_read", 450.0, "Kilobytes/Second");
        sink.put_metric("cpu_utilization_vcpu", 91.5, "Percent");

        assert_eq!(sink.values_of("bw_read"), vec![300.0, 450.0]);
        assert_eq!(sink.metrics[2].2, "Percent");
    }

    #[test]
    fn dimensions_are_replaced_not_merged() {
        let mut sink = RecordingSink::new();
        sink.set_dimensions(BTreeMap::from([(
            "fio_mode".to_string(),
            "randread".to_string(),
        )]));
        sink.set_dimensions(BTreeMap::from([(
            "fio_block_size".to_string(),
            "4096".to_string(),
        )]));

        assert_eq!(sink.dimensions.len(), 1);
        assert!(sink.dimensions.contains_key("fio_block_size"));
    }
}
