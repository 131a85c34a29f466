//! Cross-process trace identity propagation.
//!
//! Trace identity travels as W3C `traceparent` plus `baggage`. Services that
//! predate W3C propagation can additionally read plain-hex `x-trace-id` and
//! `x-span-id` headers, written when legacy mode is enabled.

mod carrier;

pub use carrier::Carrier;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

use crate::telemetry::Telemetry;
use carrier::{CarrierExtractor, CarrierInjector};

/// Header carrying the trace id as 32 lowercase hex characters.
pub const LEGACY_TRACE_ID_HEADER: &str = "x-trace-id";

/// Header carrying the span id as 16 lowercase hex characters.
pub const LEGACY_SPAN_ID_HEADER: &str = "x-span-id";

/// One extraction or injection against a carrier.
///
/// # Example
///
/// ```ignore
/// let cx = telemetry.propagate().extract(request.headers());
/// // ... handle the request under a server span ...
/// telemetry
///     .propagate()
///     .context(&cx)
///     .legacy_headers(true)
///     .inject(response.headers_mut());
/// ```
#[must_use]
pub struct Propagation<'a> {
    telemetry: &'a Telemetry,
    cx: Context,
    legacy: bool,
}

impl<'a> Propagation<'a> {
    pub(crate) fn new(telemetry: &'a Telemetry) -> Self {
        Self {
            telemetry,
            cx: Context::new(),
            legacy: false,
        }
    }

    /// Base context: extraction layers onto it, injection encodes it.
    pub fn context(mut self, cx: &Context) -> Self {
        self.cx = cx.clone();
        self
    }

    /// Also write `x-trace-id` / `x-span-id` on [`inject`](Self::inject).
    pub fn legacy_headers(mut self, enabled: bool) -> Self {
        self.legacy = enabled;
        self
    }

    /// Decode trace identity and baggage from `carrier`.
    ///
    /// Missing or malformed headers yield the base context unchanged.
    pub fn extract<C: Carrier + ?Sized>(self, carrier: &C) -> Context {
        match self.telemetry.propagator() {
            Some(propagator) => {
                propagator.extract_with_context(&self.cx, &CarrierExtractor(carrier))
            }
            None => self.cx,
        }
    }

    /// Encode the base context's identity and baggage into `carrier`.
    pub fn inject<C: Carrier + ?Sized>(self, carrier: &mut C) {
        let Some(propagator) = self.telemetry.propagator() else {
            return;
        };
        propagator.inject_context(&self.cx, &mut CarrierInjector(&mut *carrier));
        if self.legacy {
            write_legacy_headers(&self.cx, carrier);
        }
    }

    /// Write only the legacy `x-trace-id` / `x-span-id` headers, for
    /// responses returned to callers that expect them.
    pub fn inject_response<C: Carrier + ?Sized>(self, carrier: &mut C) {
        write_legacy_headers(&self.cx, carrier);
    }
}

fn write_legacy_headers<C: Carrier + ?Sized>(cx: &Context, carrier: &mut C) {
    let span = cx.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return;
    }
    carrier.set(LEGACY_TRACE_ID_HEADER, span_context.trace_id().to_string());
    carrier.set(LEGACY_SPAN_ID_HEADER, span_context.span_id().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::baggage::BaggageExt;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace::TracerProvider;
    use std::collections::HashMap;

    fn telemetry() -> Telemetry {
        Telemetry::builder()
            .tracer_provider(TracerProvider::builder().build())
            .build()
    }

    #[test]
    fn test_missing_headers_return_base_context() {
        let telemetry = telemetry();
        let headers: HashMap<String, String> = HashMap::new();

        let cx = telemetry.propagate().extract(&headers);
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_malformed_traceparent_is_ignored() {
        let telemetry = telemetry();
        let mut headers = HashMap::new();
        headers.insert("traceparent".to_string(), "00-zzzz-0000-01".to_string());

        let cx = telemetry.propagate().extract(&headers);
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_inject_extract_carries_trace_id() {
        let telemetry = telemetry();
        let (cx, span) = telemetry.trace("outbound").client().start();

        let mut headers: HashMap<String, String> = HashMap::new();
        telemetry.propagate().context(&cx).inject(&mut headers);
        assert!(headers.contains_key("traceparent"));
        assert!(!headers.contains_key(LEGACY_TRACE_ID_HEADER));

        let extracted = telemetry.propagate().extract(&headers);
        let remote = extracted.span().span_context().clone();
        assert!(remote.is_remote());
        assert_eq!(remote.trace_id(), span.trace_id());
        assert_eq!(remote.span_id(), span.span_id());
        span.end();
    }

    #[test]
    fn test_baggage_round_trip() {
        let telemetry = telemetry();
        let cx = Context::new().with_baggage(vec![KeyValue::new("tenant", "acme")]);

        let mut headers: HashMap<String, String> = HashMap::new();
        telemetry.propagate().context(&cx).inject(&mut headers);

        let extracted = telemetry.propagate().extract(&headers);
        assert_eq!(
            extracted.baggage().get("tenant").map(|v| v.to_string()),
            Some("acme".to_string())
        );
    }

    #[test]
    fn test_legacy_headers_skipped_without_span() {
        let telemetry = telemetry();
        let mut headers: HashMap<String, String> = HashMap::new();

        telemetry.propagate().legacy_headers(true).inject(&mut headers);
        telemetry.propagate().inject_response(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_inject_response_writes_only_legacy_headers() {
        let telemetry = telemetry();
        let (cx, span) = telemetry.trace("handler").server().start();

        let mut headers: HashMap<String, String> = HashMap::new();
        telemetry.propagate().context(&cx).inject_response(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[LEGACY_TRACE_ID_HEADER], span.trace_id().to_string());
        assert_eq!(headers[LEGACY_SPAN_ID_HEADER], span.span_id().to_string());
        span.end();
    }

    #[test]
    fn test_no_propagator_is_noop() {
        let telemetry = Telemetry::builder()
            .tracer_provider(TracerProvider::builder().build())
            .without_propagator()
            .build();
        let (cx, span) = telemetry.trace("work").start();

        let mut headers: HashMap<String, String> = HashMap::new();
        telemetry
            .propagate()
            .context(&cx)
            .legacy_headers(true)
            .inject(&mut headers);
        assert!(headers.is_empty());

        headers.insert(
            "traceparent".into(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".into(),
        );
        let extracted = telemetry.propagate().extract(&headers);
        assert!(!extracted.span().span_context().is_valid());
        span.end();
    }
}
