//! Telemetry configuration.
//!
//! Supports:
//! - Programmatic construction with `with_*` setters
//! - Embedding in a host CLI via `#[command(flatten)]`
//! - Environment variable fallbacks for every setting

use clap::{ArgAction, Args};
use std::time::Duration;

/// Settings consumed once by [`init`](crate::init).
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Service name attached to every signal as `service.name`
    #[arg(long = "otel-service-name", env = "OTEL_SERVICE_NAME", default_value = "unknown-service")]
    pub service_name: String,

    /// Deployment environment (dev, uat, prod, ...)
    #[arg(long = "otel-environment", env = "OTEL_DEPLOYMENT_ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// OTLP gRPC collector endpoint, `host:port` or a full URI
    #[arg(long = "otel-endpoint", env = "OTEL_EXPORTER_OTLP_ENDPOINT", default_value = "localhost:4317")]
    pub endpoint: String,

    /// Export metrics in addition to traces and logs
    #[arg(long = "otel-metrics", env = "OTEL_METRICS_ENABLED")]
    pub metrics_enabled: bool,

    /// Module path prefixes hidden from log caller attribution
    #[arg(long = "otel-skip-caller-module", env = "OTEL_SKIP_CALLER_MODULES", value_delimiter = ',')]
    pub skip_caller_modules: Vec<String>,

    /// File path substrings hidden from log caller attribution
    #[arg(long = "otel-skip-caller-file", env = "OTEL_SKIP_CALLER_FILES", value_delimiter = ',')]
    pub skip_caller_files: Vec<String>,

    /// Upper bound on pipeline construction, in seconds
    #[arg(long = "otel-connect-timeout", env = "OTEL_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Per-request export timeout, in seconds
    #[arg(long = "otel-export-timeout", env = "OTEL_EXPORT_TIMEOUT_SECS", default_value_t = 10)]
    pub export_timeout_secs: u64,

    /// Metric export interval, in seconds
    #[arg(long = "otel-metric-interval", env = "OTEL_METRIC_INTERVAL_SECS", default_value_t = 10)]
    pub metric_interval_secs: u64,

    /// Install a tracing subscriber for local log output
    #[arg(
        long = "otel-install-subscriber",
        env = "OTEL_INSTALL_SUBSCRIBER",
        action = ArgAction::Set,
        default_value_t = true
    )]
    pub install_subscriber: bool,

    /// Subscriber filter directives
    #[arg(long = "otel-log-filter", env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    /// Create a configuration for the named service with default settings.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Hide frames from these modules when attributing log callers.
    ///
    /// Both `app::internal::utils` and `app/internal/utils` forms are accepted.
    pub fn with_skip_caller_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_caller_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Hide frames from files whose path contains any of these substrings.
    pub fn with_skip_caller_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_caller_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_install_subscriber(mut self, install: bool) -> Self {
        self.install_subscriber = install;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn metric_interval(&self) -> Duration {
        Duration::from_secs(self.metric_interval_secs)
    }

    /// Collector endpoint as a URI; a bare `host:port` gets an `http://` scheme.
    pub fn endpoint_uri(&self) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".into(),
            environment: "development".into(),
            endpoint: "localhost:4317".into(),
            metrics_enabled: false,
            skip_caller_modules: Vec::new(),
            skip_caller_files: Vec::new(),
            connect_timeout_secs: 10,
            export_timeout_secs: 10,
            metric_interval_secs: 10,
            install_subscriber: true,
            log_filter: "info".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};
    use std::ffi::OsStr;

    #[derive(Parser, Debug)]
    struct HostCli {
        #[command(flatten)]
        telemetry: Config,
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, "localhost:4317");
        assert!(!config.metrics_enabled);
        assert!(config.install_subscriber);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::new("service-a")
            .with_environment("prod")
            .with_endpoint("otel-collector:4317")
            .with_metrics(true)
            .with_skip_caller_modules(["app/internal/utils"])
            .with_skip_caller_files(["wrapper.rs"]);

        assert_eq!(config.service_name, "service-a");
        assert_eq!(config.environment, "prod");
        assert!(config.metrics_enabled);
        assert_eq!(config.skip_caller_modules, vec!["app/internal/utils"]);
        assert_eq!(config.skip_caller_files, vec!["wrapper.rs"]);
    }

    #[test]
    fn test_endpoint_uri_adds_scheme() {
        let bare = Config::default().with_endpoint("otel-collector:4317");
        assert_eq!(bare.endpoint_uri(), "http://otel-collector:4317");

        let full = Config::default().with_endpoint("https://collector.example:4317");
        assert_eq!(full.endpoint_uri(), "https://collector.example:4317");
    }

    #[test]
    fn test_flattened_into_host_cli() {
        let cli = HostCli::try_parse_from([
            "host",
            "--otel-service-name",
            "billing",
            "--otel-metrics",
            "--otel-skip-caller-module",
            "billing::log,billing::util",
            "--otel-install-subscriber",
            "false",
        ])
        .unwrap();

        assert_eq!(cli.telemetry.service_name, "billing");
        assert!(cli.telemetry.metrics_enabled);
        assert_eq!(
            cli.telemetry.skip_caller_modules,
            vec!["billing::log", "billing::util"]
        );
        assert!(!cli.telemetry.install_subscriber);
    }

    #[test]
    fn test_env_fallbacks() {
        let command = HostCli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(OsStr::to_os_string)
        };

        assert_eq!(env_of("log_filter").as_deref(), Some(OsStr::new("RUST_LOG")));
        assert_eq!(
            env_of("endpoint").as_deref(),
            Some(OsStr::new("OTEL_EXPORTER_OTLP_ENDPOINT"))
        );
        assert_eq!(
            env_of("connect_timeout_secs").as_deref(),
            Some(OsStr::new("OTEL_CONNECT_TIMEOUT_SECS"))
        );
    }
}
