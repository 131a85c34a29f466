//! Destinations for finalized log records.

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry_sdk::logs::{Logger, LoggerProvider};
use std::time::SystemTime;

use super::{Level, LogRecord};
use crate::telemetry::INSTRUMENTATION_NAME;

/// Receives every record sent through a [`LogBuilder`](super::LogBuilder).
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Forwards records to the `tracing` subscriber as events under the
/// `otelkit` target.
///
/// User fields are rendered as one JSON object in the `fields` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! tracing_event {
    ($level:expr, $record:expr, $trace_id:expr, $span_id:expr, $fields:expr) => {
        tracing::event!(
            target: "otelkit",
            $level,
            trace_id = $trace_id,
            span_id = $span_id,
            caller = $record.caller.as_deref(),
            fields = %$fields,
            "{}",
            $record.message
        )
    };
}

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let trace_id = record.trace_id.map(|id| id.to_string());
        let span_id = record.span_id.map(|id| id.to_string());
        let trace_id = trace_id.as_deref();
        let span_id = span_id.as_deref();
        let fields = record.fields_json();

        match record.level {
            Level::Debug => tracing_event!(tracing::Level::DEBUG, record, trace_id, span_id, fields),
            Level::Info => tracing_event!(tracing::Level::INFO, record, trace_id, span_id, fields),
            Level::Warn => tracing_event!(tracing::Level::WARN, record, trace_id, span_id, fields),
            Level::Error => tracing_event!(tracing::Level::ERROR, record, trace_id, span_id, fields),
        }
    }
}

/// Emits records into an OpenTelemetry log pipeline.
///
/// Correlation ids and the caller are carried as plain string attributes.
pub struct OtlpLogSink {
    logger: Logger,
}

impl OtlpLogSink {
    pub fn new(provider: &LoggerProvider) -> Self {
        Self {
            logger: provider.logger(INSTRUMENTATION_NAME),
        }
    }
}

impl LogSink for OtlpLogSink {
    fn emit(&self, record: &LogRecord) {
        let mut otel = self.logger.create_log_record();
        otel.set_severity_number(record.level.severity());
        otel.set_severity_text(record.level.as_str());
        otel.set_body(AnyValue::String(record.message.clone().into()));
        otel.set_timestamp(record.timestamp);
        otel.set_observed_timestamp(SystemTime::now());

        for (key, value) in &record.fields {
            otel.add_attribute(key.clone(), value.to_log_value());
        }
        if let (Some(trace_id), Some(span_id)) = (record.trace_id, record.span_id) {
            otel.add_attribute("trace_id", AnyValue::String(trace_id.to_string().into()));
            otel.add_attribute("span_id", AnyValue::String(span_id.to_string().into()));
        }
        if let Some(caller) = &record.caller {
            otel.add_attribute("caller", AnyValue::String(caller.clone().into()));
        }

        self.logger.emit(otel);
    }
}
