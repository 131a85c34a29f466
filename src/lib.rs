//! otelkit: correlated traces, metrics and logs behind small builder APIs.
//!
//! Application code initializes telemetry once, then describes each unit of
//! work with by-value builders that are consumed by a single terminal call.
//! Trace identity flows as an explicit [`Context`] and crosses process
//! boundaries through [`Propagation`] over HTTP headers, gRPC metadata or
//! message header tables.
//!
//! # Architecture
//!
//! - **One handle**: [`Telemetry`] owns the pipelines; [`init`] builds it and
//!   installs it process-wide, [`TelemetryBuilder`] builds one for tests
//! - **Fail-open**: every operation except `init` and `shutdown` completes
//!   silently when telemetry is missing, disabled or shut down
//! - **OTLP/gRPC export**: traces, metrics and logs go to one collector
//!
//! # Modules
//!
//! - [`config`]: programmatic, CLI and environment configuration
//! - [`trace`]: span builders, scoped execution, trace sessions
//! - [`metrics`]: cached counter and histogram instruments
//! - [`log`]: log records with span correlation and caller attribution
//! - [`propagation`]: W3C and legacy header codecs over carriers
//! - [`instrument`]: HTTP server and message consumer instrumentation
//!
//! # Example
//!
//! ```ignore
//! let telemetry = otelkit::init(Config::new("orders")).await?;
//!
//! let cx = otelkit::propagate().extract(request.headers());
//! otelkit::trace("orders.create")
//!     .parent(&cx)
//!     .server()
//!     .run(|cx| {
//!         otelkit::counter("orders_created_total").attr("region", "eu").add(cx, 1);
//!         otelkit::info!(cx, "order created", items = 3);
//!         Ok::<_, anyhow::Error>(())
//!     })?;
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // trace::TraceBuilder is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod error;
pub mod instrument;
pub mod lifecycle;
pub mod log;
pub mod metrics;
pub mod propagation;
pub mod telemetry;
pub mod trace;
pub mod value;

pub use config::Config;
pub use error::{InitError, Pipeline, ShutdownError};
pub use lifecycle::init;
pub use log::{Level, LogBuilder, LogRecord, LogSink};
pub use metrics::{CounterBuilder, HistogramBuilder, MetricRegistry};
pub use opentelemetry::Context;
pub use propagation::{Carrier, Propagation};
pub use telemetry::{Telemetry, TelemetryBuilder};
pub use trace::{SpanHandle, SpanScope, TraceBuilder, TraceSession};
pub use value::{attributes_of, AttrValue};

use std::borrow::Cow;

/// Start a span on the process-wide handle.
pub fn trace(name: impl Into<Cow<'static, str>>) -> TraceBuilder<'static> {
    Telemetry::global().trace(name)
}

/// Start a counter measurement on the process-wide handle.
pub fn counter(name: impl Into<String>) -> CounterBuilder<'static> {
    Telemetry::global().counter(name)
}

/// Start a histogram measurement on the process-wide handle.
pub fn histogram(name: impl Into<String>) -> HistogramBuilder<'static> {
    Telemetry::global().histogram(name)
}

/// Start a log record on the process-wide handle.
pub fn log() -> LogBuilder<'static> {
    Telemetry::global().log()
}

/// Start a propagation operation on the process-wide handle.
pub fn propagate() -> Propagation<'static> {
    Telemetry::global().propagate()
}
