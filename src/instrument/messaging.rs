//! Message broker instrumentation.
//!
//! [`consume`] wraps a message handler in a consumer span continued from the
//! trace identity found in the message headers, and records:
//! - `message_consume_total`: messages handled, by service, queue and status
//! - `message_consume_duration_ms`: handler latency, same attributes

use opentelemetry::Context;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use crate::propagation::Carrier;
use crate::telemetry::Telemetry;

pub const CONSUME_SPAN_NAME: &str = "message.consume";
pub const CONSUME_TOTAL: &str = "message_consume_total";
pub const CONSUME_DURATION_MS: &str = "message_consume_duration_ms";

/// The parts of an incoming message that instrumentation reads.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a, C: ?Sized> {
    /// Queue or routing key the message arrived on.
    pub queue: &'a str,
    pub exchange: &'a str,
    pub headers: &'a C,
}

/// Run `handler` for one delivery inside a consumer span.
///
/// The handler's error is recorded on the span and returned unchanged.
///
/// # Example
///
/// ```ignore
/// let delivery = Delivery { queue: "orders", exchange: "events", headers: &msg.headers };
/// messaging::consume(&telemetry, "billing", delivery, |cx| handle(cx, msg)).await?;
/// ```
pub async fn consume<C, F, Fut, T, E>(
    telemetry: &Telemetry,
    service: &str,
    delivery: Delivery<'_, C>,
    handler: F,
) -> Result<T, E>
where
    C: Carrier + ?Sized,
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let parent = telemetry
        .propagate()
        .context(&Context::new())
        .extract(delivery.headers);

    telemetry
        .trace(CONSUME_SPAN_NAME)
        .parent(&parent)
        .consumer()
        .attr("messaging.destination", delivery.queue)
        .attr("messaging.exchange", delivery.exchange)
        .run_async(|cx| async move {
            let started = Instant::now();
            let result = handler(cx.clone()).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
            let status = if result.is_ok() { "success" } else { "error" };

            telemetry
                .counter(CONSUME_TOTAL)
                .attr("service", service)
                .attr("queue", delivery.queue)
                .attr("status", status)
                .add(&cx, 1);
            telemetry
                .histogram(CONSUME_DURATION_MS)
                .attr("service", service)
                .attr("queue", delivery.queue)
                .attr("status", status)
                .record(&cx, elapsed_ms);

            result
        })
        .await
}

/// Write the trace identity of `cx` into outgoing message headers.
pub fn publish_headers<C: Carrier + ?Sized>(
    telemetry: &Telemetry,
    cx: &Context,
    headers: &mut C,
    legacy: bool,
) {
    telemetry
        .propagate()
        .context(cx)
        .legacy_headers(legacy)
        .inject(headers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::LEGACY_TRACE_ID_HEADER;
    use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::TracerProvider;
    use serde_json::Value as JsonValue;
    use std::collections::HashMap;

    fn capture() -> (Telemetry, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (Telemetry::builder().tracer_provider(provider).build(), exporter)
    }

    #[tokio::test]
    async fn test_consume_continues_publisher_trace() {
        let (telemetry, exporter) = capture();
        let (cx, publisher) = telemetry.trace("publish").producer().start();

        let mut headers: HashMap<String, JsonValue> = HashMap::new();
        publish_headers(&telemetry, &cx, &mut headers, true);
        publisher.end();
        assert_eq!(
            headers[LEGACY_TRACE_ID_HEADER],
            JsonValue::String(publisher.trace_id().to_string())
        );

        let delivery = Delivery {
            queue: "orders",
            exchange: "events",
            headers: &headers,
        };
        let seen = consume(&telemetry, "billing", delivery, |cx| async move {
            Ok::<_, std::io::Error>(cx.span().span_context().trace_id())
        })
        .await
        .unwrap();
        assert_eq!(seen, publisher.trace_id());

        let spans = exporter.get_finished_spans().unwrap();
        let consumer = spans.iter().find(|s| s.name == CONSUME_SPAN_NAME).unwrap();
        assert_eq!(consumer.span_kind, SpanKind::Consumer);
        assert_eq!(consumer.parent_span_id, publisher.span_id());
        assert!(consumer
            .attributes
            .contains(&KeyValue::new("messaging.destination", "orders")));
    }

    #[tokio::test]
    async fn test_consume_records_handler_error() {
        let (telemetry, exporter) = capture();
        let headers: HashMap<String, String> = HashMap::new();
        let delivery = Delivery {
            queue: "orders",
            exchange: "",
            headers: &headers,
        };

        let result: Result<(), String> =
            consume(&telemetry, "billing", delivery, |_| async { Err("nack".to_string()) }).await;
        assert_eq!(result, Err("nack".to_string()));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].status, Status::error("nack"));
    }
}
