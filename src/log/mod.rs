//! Structured log records correlated with the active span.
//!
//! A [`LogBuilder`] is finalized by [`send`](LogBuilder::send), which attaches
//! the `trace_id` / `span_id` of the span active in the builder's context and
//! the caller location, then hands the record to the local sink and the
//! remote log pipeline, whichever are configured.

mod caller;
mod macros;
mod sink;

pub use caller::CallerFilter;
pub use sink::{LogSink, OtlpLogSink, TracingSink};

use opentelemetry::logs::Severity;
use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use opentelemetry::Context;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::time::SystemTime;

use crate::telemetry::Telemetry;
use crate::value::{attributes_of, AttrValue};

/// Message used when none is set.
pub const DEFAULT_MESSAGE: &str = "no-message";

/// Log severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Level::Debug => Severity::Debug,
            Level::Info => Severity::Info,
            Level::Warn => Severity::Warn,
            Level::Error => Severity::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized log record as delivered to sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, AttrValue)>,
    /// `"<file>:<line> <module>::<function>"` of the logging call site.
    pub caller: Option<String>,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
    pub timestamp: SystemTime,
}

impl LogRecord {
    /// User fields as a JSON object; a repeated key keeps its last value.
    pub fn fields_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }

    pub fn field(&self, key: &str) -> Option<&AttrValue> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// A log record being configured.
///
/// # Example
///
/// ```ignore
/// telemetry
///     .log()
///     .context(&cx)
///     .warn()
///     .msg("retrying payment")
///     .field("attempt", attempt)
///     .send();
/// ```
#[must_use]
pub struct LogBuilder<'a> {
    telemetry: &'a Telemetry,
    cx: Option<Context>,
    level: Level,
    message: String,
    fields: Vec<(String, AttrValue)>,
}

impl<'a> LogBuilder<'a> {
    pub(crate) fn new(telemetry: &'a Telemetry) -> Self {
        Self {
            telemetry,
            cx: None,
            level: Level::Info,
            message: String::new(),
            fields: Vec::new(),
        }
    }

    /// Context whose active span the record is correlated with. Defaults to
    /// the thread's current context.
    pub fn context(mut self, cx: &Context) -> Self {
        self.cx = Some(cx.clone());
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn debug(self) -> Self {
        self.level(Level::Debug)
    }

    pub fn info(self) -> Self {
        self.level(Level::Info)
    }

    pub fn warn(self) -> Self {
        self.level(Level::Warn)
    }

    pub fn error(self) -> Self {
        self.level(Level::Error)
    }

    pub fn msg(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// One field per top-level member of a serializable struct or map.
    pub fn fields_from<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.fields(attributes_of(value))
    }

    /// Finalize the record and emit it.
    ///
    /// Does nothing, including the stack walk, when no sink is configured.
    pub fn send(self) {
        let Some(sinks) = self.telemetry.log_sinks() else {
            return;
        };

        let cx = self.cx.unwrap_or_else(Context::current);
        let span = cx.span();
        let span_context = span.span_context();
        let (trace_id, span_id) = if span_context.is_valid() {
            (Some(span_context.trace_id()), Some(span_context.span_id()))
        } else {
            (None, None)
        };

        let message = if self.message.is_empty() {
            DEFAULT_MESSAGE.to_string()
        } else {
            self.message
        };

        let record = LogRecord {
            level: self.level,
            message,
            fields: self.fields,
            caller: sinks.caller_filter.resolve(),
            trace_id,
            span_id,
            timestamp: SystemTime::now(),
        };

        if let Some(local) = sinks.local {
            local.emit(&record);
        }
        if let Some(remote) = sinks.remote {
            remote.emit(&record);
        }
    }
}
