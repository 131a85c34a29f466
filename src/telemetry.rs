//! The telemetry handle that every builder operates against.
//!
//! A [`Telemetry`] value owns the trace, metric and log pipelines of one
//! process (or one test). It is constructed by [`init`](crate::init) or by
//! [`TelemetryBuilder`], and can be installed once as the process-wide handle
//! reached by the crate-level shortcuts (`otelkit::trace`, `otelkit::log`, ...).
//! Before installation those shortcuts resolve to an inert handle that produces
//! no telemetry.

use opentelemetry::global;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::Config;
use crate::error::{InitError, Pipeline, ShutdownError};
use crate::log::{CallerFilter, LogBuilder, LogSink, OtlpLogSink};
use crate::metrics::{CounterBuilder, HistogramBuilder, MetricRegistry};
use crate::propagation::Propagation;
use crate::trace::TraceBuilder;

/// Instrumentation scope name used for the meter and the remote logger.
pub const INSTRUMENTATION_NAME: &str = "otelkit";

/// Process-wide handle, assigned at most once.
static GLOBAL: OnceLock<Telemetry> = OnceLock::new();

/// Handle returned by [`Telemetry::global`] before anything is installed.
static INERT: OnceLock<Telemetry> = OnceLock::new();

/// Build the W3C trace-context + baggage propagator.
pub(crate) fn w3c_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

/// Shared handle to the trace, metric and log pipelines.
///
/// Cloning is cheap; all clones refer to the same pipelines.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

struct Inner {
    tracer_provider: Option<TracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<LoggerProvider>,
    propagator: Option<TextMapCompositePropagator>,
    metrics: MetricRegistry,
    local_sink: Option<Arc<dyn LogSink>>,
    remote_sink: Option<Arc<dyn LogSink>>,
    caller_filter: CallerFilter,
    shut_down: AtomicBool,
}

/// Sinks a log record is delivered to, resolved at send time.
pub(crate) struct LogSinks<'a> {
    pub local: Option<&'a dyn LogSink>,
    pub remote: Option<&'a dyn LogSink>,
    pub caller_filter: &'a CallerFilter,
}

impl Telemetry {
    /// Start assembling a handle from explicit providers and sinks.
    pub fn builder() -> TelemetryBuilder {
        TelemetryBuilder::new()
    }

    /// A handle with no pipelines; every operation is a no-op.
    pub fn disabled() -> Self {
        TelemetryBuilder::new().without_propagator().build()
    }

    /// The installed process-wide handle, or an inert one before installation.
    pub fn global() -> &'static Telemetry {
        GLOBAL
            .get()
            .unwrap_or_else(|| INERT.get_or_init(Telemetry::disabled))
    }

    /// Whether a process-wide handle has been installed.
    pub fn is_installed() -> bool {
        GLOBAL.get().is_some()
    }

    /// Install this handle as the process-wide handle.
    ///
    /// Also registers the tracer provider, meter provider and propagator with
    /// the OpenTelemetry globals so third-party instrumentation shares them.
    /// Only the first installation in a process succeeds.
    pub fn install(&self) -> Result<(), InitError> {
        GLOBAL
            .set(self.clone())
            .map_err(|_| InitError::AlreadyInitialized)?;

        if let Some(provider) = &self.inner.tracer_provider {
            global::set_tracer_provider(provider.clone());
        }
        if let Some(provider) = &self.inner.meter_provider {
            global::set_meter_provider(provider.clone());
        }
        if self.inner.propagator.is_some() {
            global::set_text_map_propagator(w3c_propagator());
        }
        Ok(())
    }

    /// False once [`shutdown`](Self::shutdown) has run.
    pub fn is_active(&self) -> bool {
        !self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Start configuring a span.
    pub fn trace(&self, name: impl Into<Cow<'static, str>>) -> TraceBuilder<'_> {
        TraceBuilder::new(self).name(name)
    }

    /// Start configuring a counter measurement.
    pub fn counter(&self, name: impl Into<String>) -> CounterBuilder<'_> {
        CounterBuilder::new(&self.inner.metrics, name)
    }

    /// Start configuring a histogram measurement.
    pub fn histogram(&self, name: impl Into<String>) -> HistogramBuilder<'_> {
        HistogramBuilder::new(&self.inner.metrics, name)
    }

    /// Start configuring a log record.
    pub fn log(&self) -> LogBuilder<'_> {
        LogBuilder::new(self)
    }

    /// Start a propagation operation.
    pub fn propagate(&self) -> Propagation<'_> {
        Propagation::new(self)
    }

    /// The instrument cache backing [`counter`](Self::counter) and
    /// [`histogram`](Self::histogram).
    pub fn metrics(&self) -> &MetricRegistry {
        &self.inner.metrics
    }

    pub(crate) fn tracer(&self, name: Cow<'static, str>) -> Option<Tracer> {
        if !self.is_active() {
            return None;
        }
        self.inner
            .tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(name))
    }

    pub(crate) fn propagator(&self) -> Option<&TextMapCompositePropagator> {
        self.inner.propagator.as_ref()
    }

    /// Sinks for a log record, or `None` when nothing would be emitted.
    pub(crate) fn log_sinks(&self) -> Option<LogSinks<'_>> {
        if !self.is_active() {
            return None;
        }
        let local = self.inner.local_sink.as_deref();
        let remote = self.inner.remote_sink.as_deref();
        if local.is_none() && remote.is_none() {
            return None;
        }
        Some(LogSinks {
            local,
            remote,
            caller_filter: &self.inner.caller_filter,
        })
    }

    /// Flush and close every pipeline.
    ///
    /// Each pipeline is shut down independently; failures are collected rather
    /// than stopping at the first one. After shutdown all builder operations
    /// become no-ops. Calling this more than once is a no-op.
    ///
    /// With batch exporters on the Tokio runtime this blocks until the final
    /// export completes. From async code use
    /// [`shutdown_async`](Self::shutdown_async) instead.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.metrics.close();

        let mut failures = Vec::new();
        if let Some(provider) = &self.inner.tracer_provider {
            if let Err(e) = provider.shutdown() {
                failures.push((Pipeline::Traces, e.to_string()));
            }
        }
        if let Some(provider) = &self.inner.meter_provider {
            if let Err(e) = provider.shutdown() {
                failures.push((Pipeline::Metrics, e.to_string()));
            }
        }
        if let Some(provider) = &self.inner.logger_provider {
            if let Err(e) = provider.shutdown() {
                failures.push((Pipeline::Logs, e.to_string()));
            }
        }

        if failures.is_empty() {
            tracing::debug!("Telemetry pipelines shut down");
            Ok(())
        } else {
            tracing::warn!(failed = failures.len(), "Telemetry shutdown incomplete");
            Err(ShutdownError { failures })
        }
    }

    /// [`shutdown`](Self::shutdown) on a blocking thread, leaving the runtime
    /// free to drive the final exports. Safe on a current-thread runtime.
    pub async fn shutdown_async(&self) -> Result<(), ShutdownError> {
        let telemetry = self.clone();
        match tokio::task::spawn_blocking(move || telemetry.shutdown()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // cancelled before it ran; shutdown is idempotent
            Err(_) => self.shutdown(),
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("traces", &self.inner.tracer_provider.is_some())
            .field("metrics", &self.inner.metrics.is_enabled())
            .field("remote_logs", &self.inner.remote_sink.is_some())
            .field("local_logs", &self.inner.local_sink.is_some())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Builder for a [`Telemetry`] handle.
///
/// # Example
///
/// ```ignore
/// let telemetry = Telemetry::builder()
///     .config(Config::new("orders").with_metrics(true))
///     .tracer_provider(tracer_provider)
///     .meter_provider(meter_provider)
///     .local_sink(Arc::new(TracingSink))
///     .build();
/// ```
#[must_use]
pub struct TelemetryBuilder {
    config: Config,
    tracer_provider: Option<TracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<LoggerProvider>,
    local_sink: Option<Arc<dyn LogSink>>,
    remote_sink: Option<Arc<dyn LogSink>>,
    propagator: bool,
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            tracer_provider: None,
            meter_provider: None,
            logger_provider: None,
            local_sink: None,
            remote_sink: None,
            propagator: true,
        }
    }

    /// Settings for metrics enablement and caller attribution.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn tracer_provider(mut self, provider: TracerProvider) -> Self {
        self.tracer_provider = Some(provider);
        self
    }

    /// Meter provider; only used when the config enables metrics.
    pub fn meter_provider(mut self, provider: SdkMeterProvider) -> Self {
        self.meter_provider = Some(provider);
        self
    }

    /// Logger provider; also becomes the remote sink unless one is set.
    pub fn logger_provider(mut self, provider: LoggerProvider) -> Self {
        self.logger_provider = Some(provider);
        self
    }

    pub fn local_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.local_sink = Some(sink);
        self
    }

    pub fn remote_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.remote_sink = Some(sink);
        self
    }

    /// Leave propagation unconfigured; extract and inject become no-ops.
    pub fn without_propagator(mut self) -> Self {
        self.propagator = false;
        self
    }

    pub fn build(self) -> Telemetry {
        let meter = if self.config.metrics_enabled {
            self.meter_provider
                .as_ref()
                .map(|provider| provider.meter(INSTRUMENTATION_NAME))
        } else {
            None
        };

        let remote_sink = self.remote_sink.or_else(|| {
            self.logger_provider
                .as_ref()
                .map(|provider| Arc::new(OtlpLogSink::new(provider)) as Arc<dyn LogSink>)
        });

        let caller_filter = CallerFilter::new(
            &self.config.skip_caller_modules,
            &self.config.skip_caller_files,
        );

        Telemetry {
            inner: Arc::new(Inner {
                tracer_provider: self.tracer_provider,
                meter_provider: self.meter_provider,
                logger_provider: self.logger_provider,
                propagator: self.propagator.then(w3c_propagator),
                metrics: MetricRegistry::new(meter),
                local_sink: self.local_sink,
                remote_sink,
                caller_filter,
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}
