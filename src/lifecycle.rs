//! One-time construction of the OTLP export pipelines.
//!
//! [`init`] connects to the collector once, builds the trace, log and
//! (optionally) metric pipelines over that shared gRPC channel, then installs
//! the resulting [`Telemetry`] as the process-wide handle. Nothing is installed
//! unless the collector is reachable and every pipeline builds.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::error::InitError;
use crate::log::TracingSink;
use crate::telemetry::{Telemetry, INSTRUMENTATION_NAME};

struct Pipelines {
    tracer: TracerProvider,
    logger: LoggerProvider,
    meter: Option<SdkMeterProvider>,
}

/// Initialize telemetry for this process.
///
/// Must be called from within a Tokio runtime; the batch exporters run on it.
/// Only the first successful call installs a handle, later calls fail with
/// [`InitError::AlreadyInitialized`]. Call [`Telemetry::shutdown`] on the
/// returned handle before exiting to flush buffered telemetry.
///
/// # Example
///
/// ```ignore
/// let telemetry = otelkit::init(Config::new("orders").with_metrics(true)).await?;
/// // ...
/// telemetry.shutdown_async().await?;
/// ```
pub async fn init(config: Config) -> Result<Telemetry, InitError> {
    if Telemetry::is_installed() {
        return Err(InitError::AlreadyInitialized);
    }
    let endpoint = validate_endpoint(&config)?;

    let resource = Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let channel = connect(&endpoint, config.connect_timeout()).await?;
    let pipelines = build_pipelines(&config, &channel, resource)?;

    let mut builder = Telemetry::builder()
        .config(config.clone())
        .tracer_provider(pipelines.tracer.clone())
        .logger_provider(pipelines.logger)
        .local_sink(Arc::new(TracingSink));
    if let Some(meter) = pipelines.meter {
        builder = builder.meter_provider(meter);
    }
    let telemetry = builder.build();
    telemetry.install()?;

    if config.install_subscriber {
        install_subscriber(&config, &pipelines.tracer);
    }

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        endpoint = %endpoint,
        metrics = config.metrics_enabled,
        "Telemetry initialized"
    );
    Ok(telemetry)
}

/// The collector endpoint as a URI with a host.
fn validate_endpoint(config: &Config) -> Result<String, InitError> {
    let endpoint = config.endpoint_uri();
    let invalid = || InitError::InvalidEndpoint {
        endpoint: config.endpoint.clone(),
    };
    let uri: http::Uri = endpoint.parse().map_err(|_| invalid())?;
    if uri.host().map_or(true, str::is_empty) {
        return Err(invalid());
    }
    Ok(endpoint)
}

/// Open the collector channel, failing if it is not up within `deadline`.
async fn connect(endpoint: &str, deadline: Duration) -> Result<Channel, InitError> {
    let connect_error = |source| InitError::Connect {
        endpoint: endpoint.to_string(),
        source,
    };
    let ep = Endpoint::from_shared(endpoint.to_string())
        .map_err(connect_error)?
        .connect_timeout(deadline);
    let connecting = ep.connect();

    tokio::time::timeout(deadline, connecting)
        .await
        .map_err(|_| InitError::Timeout(deadline))?
        .map_err(connect_error)
}

fn exporter(config: &Config, channel: &Channel) -> opentelemetry_otlp::TonicExporterBuilder {
    opentelemetry_otlp::new_exporter()
        .tonic()
        .with_channel(channel.clone())
        .with_timeout(config.export_timeout())
}

fn build_pipelines(
    config: &Config,
    channel: &Channel,
    resource: Resource,
) -> Result<Pipelines, InitError> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter(config, channel))
        .with_trace_config(sdktrace::Config::default().with_resource(resource.clone()))
        .install_batch(runtime::Tokio)?;

    let logger = opentelemetry_otlp::new_pipeline()
        .logging()
        .with_resource(resource.clone())
        .with_exporter(exporter(config, channel))
        .install_batch(runtime::Tokio)?;

    let meter = if config.metrics_enabled {
        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(exporter(config, channel))
            .with_resource(resource)
            .with_period(config.metric_interval())
            .build()?;
        Some(provider)
    } else {
        None
    };

    Ok(Pipelines {
        tracer,
        logger,
        meter,
    })
}

/// Install the local subscriber: env filter, JSON output, span export.
///
/// An already installed subscriber is kept.
fn install_subscriber(config: &Config, tracer_provider: &TracerProvider) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(INSTRUMENTATION_NAME));

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
    {
        tracing::warn!(error = %e, "Tracing subscriber already installed, keeping it");
    }
}
