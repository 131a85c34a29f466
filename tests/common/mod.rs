//! Test utilities for otelkit integration tests.
//!
//! Provides:
//! - A telemetry handle wired to in-memory span, metric and log capture
//! - Lookup helpers for exported spans and metric values

#![allow(dead_code)]

use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::metrics::data::{Histogram, ResourceMetrics, Sum};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::testing::metrics::InMemoryMetricsExporter;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use otelkit::{Config, LogRecord, LogSink, Telemetry};
use std::sync::{Arc, Mutex};

/// Log sink that keeps every record it receives.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CaptureSink {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl LogSink for CaptureSink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Telemetry handle whose output is captured in memory.
pub struct TestTelemetry {
    pub telemetry: Telemetry,
    pub spans: InMemorySpanExporter,
    pub logs: Arc<CaptureSink>,
    metrics: Option<(InMemoryMetricsExporter, SdkMeterProvider)>,
}

impl TestTelemetry {
    /// Traces and logs only.
    pub fn new() -> Self {
        Self::build(Config::new("test-service"), false)
    }

    /// Traces and logs with the given caller settings.
    pub fn with_config(config: Config) -> Self {
        Self::build(config, false)
    }

    /// Traces, logs and metrics.
    ///
    /// The periodic reader runs on Tokio, so this must be called from a
    /// multi-threaded runtime.
    pub fn with_metrics() -> Self {
        Self::build(Config::new("test-service").with_metrics(true), true)
    }

    fn build(config: Config, metrics: bool) -> Self {
        let spans = InMemorySpanExporter::default();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(spans.clone())
            .build();
        let logs = Arc::new(CaptureSink::default());

        let mut builder = Telemetry::builder()
            .config(config)
            .tracer_provider(tracer_provider)
            .local_sink(logs.clone());

        let metrics = metrics.then(|| {
            let exporter = InMemoryMetricsExporter::default();
            let reader = PeriodicReader::builder(exporter.clone(), runtime::Tokio).build();
            let provider = SdkMeterProvider::builder().with_reader(reader).build();
            (exporter, provider)
        });
        if let Some((_, provider)) = &metrics {
            builder = builder.meter_provider(provider.clone());
        }

        Self {
            telemetry: builder.build(),
            spans,
            logs,
            metrics,
        }
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap()
    }

    /// The single finished span named `name`.
    pub fn span(&self, name: &str) -> SpanData {
        let mut matching: Vec<_> = self
            .finished_spans()
            .into_iter()
            .filter(|s| s.name == name)
            .collect();
        assert_eq!(matching.len(), 1, "expected one span named {name}");
        matching.remove(0)
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.logs.records()
    }

    fn latest_metrics(&self) -> Option<ResourceMetrics> {
        let (exporter, provider) = self.metrics.as_ref()?;
        provider.force_flush().unwrap();
        exporter.get_finished_metrics().unwrap().pop()
    }

    /// Cumulative value of counter `name`, summed over attribute sets.
    pub fn counter_total(&self, name: &str) -> Option<u64> {
        let metrics = self.latest_metrics()?;
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
            .find_map(|metric| metric.data.as_any().downcast_ref::<Sum<u64>>())
            .map(|sum| sum.data_points.iter().map(|dp| dp.value).sum())
    }

    /// Number of values recorded by histogram `name`.
    pub fn histogram_count(&self, name: &str) -> Option<u64> {
        let metrics = self.latest_metrics()?;
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == name)
            .find_map(|metric| metric.data.as_any().downcast_ref::<Histogram<f64>>())
            .map(|histogram| histogram.data_points.iter().map(|dp| dp.count).sum())
    }

    /// Unit the exported instrument `name` was created with.
    pub fn metric_unit(&self, name: &str) -> Option<String> {
        let metrics = self.latest_metrics()?;
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .find(|metric| metric.name == name)
            .map(|metric| metric.unit.to_string())
    }
}

impl Default for TestTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
