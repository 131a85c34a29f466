//! Server-side HTTP instrumentation usable from any `http`-based framework.
//!
//! [`HttpServerInstrumentation::start`] opens a server span for an incoming
//! request, continued from its `traceparent`. [`HttpServerSpan::finish`] maps
//! the response status onto the span, records request metrics and, when
//! enabled, writes `x-trace-id` / `x-span-id` into the response headers.
//!
//! Metrics, when enabled:
//! - `http_requests_total` (counter)
//! - `http_request_duration_ms` (histogram)
//! - `http_response_size_bytes` (histogram, non-empty responses only)

use http::header::{CONTENT_LENGTH, HOST, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode};
use opentelemetry::Context;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::telemetry::Telemetry;
use crate::trace::{SpanHandle, SpanScope};
use crate::value::AttrValue;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_MS: &str = "http_request_duration_ms";
pub const RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";

/// Builds a span name from the request method and route.
pub type SpanNameFormatter = Arc<dyn Fn(&Method, &str) -> String + Send + Sync>;

fn default_span_name(method: &Method, route: &str) -> String {
    let route = if route.is_empty() { "unknown" } else { route };
    format!("{method} {route}")
}

/// HTTP server instrumentation settings.
#[derive(Clone)]
pub struct HttpServerInstrumentation {
    tracer_name: Cow<'static, str>,
    service_name: Option<String>,
    skip_paths: HashSet<String>,
    span_name: SpanNameFormatter,
    metrics: bool,
    propagate_to_response: bool,
}

impl Default for HttpServerInstrumentation {
    fn default() -> Self {
        Self {
            tracer_name: Cow::Borrowed("http-server"),
            service_name: None,
            skip_paths: HashSet::new(),
            span_name: Arc::new(default_span_name),
            metrics: true,
            propagate_to_response: true,
        }
    }
}

impl fmt::Debug for HttpServerInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerInstrumentation")
            .field("tracer_name", &self.tracer_name)
            .field("service_name", &self.service_name)
            .field("skip_paths", &self.skip_paths)
            .field("metrics", &self.metrics)
            .field("propagate_to_response", &self.propagate_to_response)
            .finish_non_exhaustive()
    }
}

impl HttpServerInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracer_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tracer_name = name.into();
        self
    }

    /// Adds a `service` attribute to request metrics.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Requests whose path or route matches one of these are not traced.
    pub fn with_skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_span_name<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Method, &str) -> String + Send + Sync + 'static,
    {
        self.span_name = Arc::new(formatter);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn with_response_propagation(mut self, enabled: bool) -> Self {
        self.propagate_to_response = enabled;
        self
    }

    /// Open a server span for `request`.
    ///
    /// `route` is the matched route template when the framework knows it;
    /// otherwise the request path is used. Returns `None` for skipped paths.
    pub fn start<'a, B>(
        &self,
        telemetry: &'a Telemetry,
        request: &Request<B>,
        route: Option<&str>,
    ) -> Option<HttpServerSpan<'a>> {
        let path = request.uri().path();
        let route = route.filter(|r| !r.is_empty()).unwrap_or(path);
        if self.skip_paths.contains(path) || self.skip_paths.contains(route) {
            return None;
        }

        let headers = request.headers();
        let parent = telemetry.propagate().context(&Context::new()).extract(headers);

        let mut builder = telemetry
            .trace((self.span_name)(request.method(), route))
            .parent(&parent)
            .server()
            .tracer_name(self.tracer_name.clone())
            .attr("http.method", request.method().as_str())
            .attr("http.scheme", scheme(request))
            .attr("http.target", path)
            .attr("http.route", route)
            .attr(
                "http.user_agent",
                header_str(headers, USER_AGENT.as_str()).unwrap_or_default(),
            );
        let content_length =
            header_str(headers, CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<i64>().ok());
        if let Some(length) = content_length {
            builder = builder.attr("http.request_content_length", length);
        }
        if let Some(host) = header_str(headers, HOST.as_str()).or_else(|| request.uri().host()) {
            builder = builder.attr("net.host.name", host);
        }
        if let Some(ip) = client_ip(request) {
            builder = builder.attr("net.peer.ip", ip);
        }
        if request.uri().query().is_some() {
            builder = builder.attr("http.url", request.uri().to_string());
        }

        Some(HttpServerSpan {
            telemetry,
            settings: self.clone(),
            scope: builder.start_scope(),
            method: request.method().clone(),
            route: route.to_string(),
            started: Instant::now(),
        })
    }
}

/// An in-flight request span. Ends when finished or dropped.
pub struct HttpServerSpan<'a> {
    telemetry: &'a Telemetry,
    settings: HttpServerInstrumentation,
    scope: SpanScope,
    method: Method,
    route: String,
    started: Instant,
}

impl HttpServerSpan<'_> {
    /// Context to run the handler under.
    pub fn context(&self) -> &Context {
        self.scope.context()
    }

    pub fn span(&self) -> Option<&SpanHandle> {
        self.scope.span()
    }

    /// Complete the span from the response.
    pub fn finish(self, status: StatusCode, response_size: u64, response_headers: &mut HeaderMap) {
        let cx = self.scope.context();
        let code = status.as_u16();

        if let Some(span) = self.scope.span() {
            span.set_attribute("http.status_code", code);
            span.set_attribute("http.response_content_length", response_size);
            if status.is_server_error() {
                span.set_error(format!("HTTP {code}"));
            } else if status.is_client_error() {
                span.set_attribute("http.error", true);
            } else {
                span.set_ok();
            }
        }

        if self.settings.metrics {
            let elapsed_ms = self.started.elapsed().as_secs_f64() * 1_000.0;
            let method = self.method.as_str();
            let mut attrs: Vec<(&'static str, AttrValue)> = vec![
                ("method", method.into()),
                ("path", self.route.as_str().into()),
                ("status", code.into()),
                ("status_class", status_class(code).into()),
            ];
            if let Some(service) = &self.settings.service_name {
                attrs.push(("service", service.into()));
            }

            self.telemetry
                .counter(REQUESTS_TOTAL)
                .attrs(attrs.clone())
                .add(cx, 1);
            self.telemetry
                .histogram(REQUEST_DURATION_MS)
                .attrs(attrs)
                .record(cx, elapsed_ms);
            if response_size > 0 {
                self.telemetry
                    .histogram(RESPONSE_SIZE_BYTES)
                    .unit("By")
                    .attr("method", method)
                    .attr("path", self.route.as_str())
                    .record(cx, response_size as f64);
            }
        }

        if self.settings.propagate_to_response {
            self.telemetry
                .propagate()
                .context(cx)
                .inject_response(response_headers);
        }
    }
}

/// `"1xx"` through `"5xx"` for a status code.
pub fn status_class(code: u16) -> &'static str {
    match code {
        500.. => "5xx",
        400..=499 => "4xx",
        300..=399 => "3xx",
        200..=299 => "2xx",
        _ => "1xx",
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn scheme<B>(request: &Request<B>) -> String {
    if let Some(proto) = header_str(request.headers(), "x-forwarded-proto") {
        return proto.to_string();
    }
    request
        .uri()
        .scheme_str()
        .unwrap_or("http")
        .to_string()
}

/// Client address: forwarding headers first, then a `SocketAddr` extension.
fn client_ip<B>(request: &Request<B>) -> Option<String> {
    let headers = request.headers();
    header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<SocketAddr>()
                .map(|addr| addr.ip().to_string())
        })
}
