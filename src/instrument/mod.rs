//! Ready-made instrumentation for common transports.

pub mod http_server;
pub mod messaging;

pub use http_server::{status_class, HttpServerInstrumentation, HttpServerSpan};
pub use messaging::Delivery;
