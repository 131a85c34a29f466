//! Errors returned by the two fail-closed boundary calls, `init` and `shutdown`.
//!
//! Every other operation in the crate is fail-open and never returns an error.

use opentelemetry::logs::LogError;
use opentelemetry::metrics::MetricsError;
use opentelemetry::trace::TraceError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type for telemetry initialization failures.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("telemetry is already initialized for this process")]
    AlreadyInitialized,

    #[error("invalid collector endpoint {endpoint:?}")]
    InvalidEndpoint { endpoint: String },

    #[error("collector {endpoint} is unreachable: {source}")]
    Connect {
        endpoint: String,
        source: tonic::transport::Error,
    },

    #[error("failed to build trace pipeline: {0}")]
    Trace(#[from] TraceError),

    #[error("failed to build metric pipeline: {0}")]
    Metrics(#[from] MetricsError),

    #[error("failed to build log pipeline: {0}")]
    Logs(#[from] LogError),

    #[error("collector connection not established within {0:?}")]
    Timeout(Duration),
}

/// Which export pipeline a shutdown failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Traces,
    Metrics,
    Logs,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pipeline::Traces => "traces",
            Pipeline::Metrics => "metrics",
            Pipeline::Logs => "logs",
        })
    }
}

/// Per-pipeline failures collected during shutdown.
///
/// Every pipeline is shut down even when an earlier one fails.
#[derive(Debug, Error)]
pub struct ShutdownError {
    pub failures: Vec<(Pipeline, String)>,
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "telemetry shutdown failed: ")?;
        for (i, (pipeline, message)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{pipeline}: {message}")?;
        }
        Ok(())
    }
}
