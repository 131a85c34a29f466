//! End-to-end propagation tests.
//!
//! Tests:
//! - Inbound traceparent continues into a server span and back out
//! - Legacy response headers are opt-in
//! - gRPC metadata and message headers carry the same identity

mod common;

use common::TestTelemetry;
use http::HeaderMap;
use opentelemetry::baggage::BaggageExt;
use opentelemetry::trace::TraceContextExt;
use otelkit::propagation::{LEGACY_SPAN_ID_HEADER, LEGACY_TRACE_ID_HEADER};
use otelkit::Context;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tonic::metadata::MetadataMap;

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

fn inbound_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("traceparent", TRACEPARENT.parse().unwrap());
    headers
}

#[test]
fn test_inbound_request_with_legacy_headers() {
    let fixture = TestTelemetry::new();
    let telemetry = &fixture.telemetry;

    let cx = telemetry.propagate().extract(&inbound_headers());
    let (cx, span) = telemetry.trace("GET /orders").parent(&cx).server().start();

    let mut response = HeaderMap::new();
    telemetry
        .propagate()
        .context(&cx)
        .legacy_headers(true)
        .inject(&mut response);
    span.end();

    assert_eq!(response[LEGACY_TRACE_ID_HEADER], TRACE_ID);
    assert_eq!(response[LEGACY_SPAN_ID_HEADER], span.span_id().to_string().as_str());
    let traceparent = response["traceparent"].to_str().unwrap();
    assert!(traceparent.starts_with(&format!("00-{TRACE_ID}-")));

    let server = fixture.span("GET /orders");
    assert_eq!(server.span_context.trace_id().to_string(), TRACE_ID);
    assert_eq!(server.parent_span_id.to_string(), "00f067aa0ba902b7");
}

#[test]
fn test_inbound_request_without_legacy_headers() {
    let fixture = TestTelemetry::new();
    let telemetry = &fixture.telemetry;

    let cx = telemetry.propagate().extract(&inbound_headers());
    let (cx, span) = telemetry.trace("GET /orders").parent(&cx).server().start();

    let mut response = HeaderMap::new();
    telemetry.propagate().context(&cx).inject(&mut response);
    span.end();

    assert!(response.get(LEGACY_TRACE_ID_HEADER).is_none());
    assert!(response.get(LEGACY_SPAN_ID_HEADER).is_none());
    assert!(response.contains_key("traceparent"));
}

#[test]
fn test_grpc_metadata_round_trip() {
    let fixture = TestTelemetry::new();
    let telemetry = &fixture.telemetry;
    let (cx, span) = telemetry.trace("rpc.call").client().start();

    let mut metadata = MetadataMap::new();
    telemetry.propagate().context(&cx).inject(&mut metadata);
    let extracted = telemetry.propagate().extract(&metadata);
    span.end();

    assert_eq!(
        extracted.span().span_context().trace_id(),
        span.trace_id()
    );
}

#[test]
fn test_message_headers_round_trip_with_baggage() {
    let fixture = TestTelemetry::new();
    let telemetry = &fixture.telemetry;
    let parent = Context::new().with_baggage(vec![opentelemetry::KeyValue::new("tenant", "acme")]);
    let (cx, span) = telemetry.trace("publish").parent(&parent).producer().start();

    let mut headers: HashMap<String, JsonValue> = HashMap::new();
    headers.insert("content-type".into(), JsonValue::from("application/json"));
    telemetry.propagate().context(&cx).inject(&mut headers);

    let extracted = telemetry.propagate().extract(&headers);
    span.end();

    assert_eq!(extracted.span().span_context().trace_id(), span.trace_id());
    assert_eq!(
        extracted.baggage().get("tenant").map(ToString::to_string),
        Some("acme".to_string())
    );
}

#[test]
fn test_extract_layers_onto_base_context() {
    let fixture = TestTelemetry::new();
    let telemetry = &fixture.telemetry;
    let base = Context::new().with_baggage(vec![opentelemetry::KeyValue::new("region", "eu")]);

    let empty: HashMap<String, String> = HashMap::new();
    let cx = telemetry.propagate().context(&base).extract(&empty);

    assert!(!cx.span().span_context().is_valid());
    assert_eq!(
        cx.baggage().get("region").map(ToString::to_string),
        Some("eu".to_string())
    );
}
