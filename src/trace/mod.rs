//! Span construction and scoped execution.
//!
//! A [`TraceBuilder`] collects the span configuration and is consumed by one
//! terminal call:
//! - [`start`](TraceBuilder::start) returns the child context and a [`SpanHandle`]
//! - [`start_scope`](TraceBuilder::start_scope) returns a [`SpanScope`] that ends
//!   the span when dropped
//! - [`run`](TraceBuilder::run) / [`run_async`](TraceBuilder::run_async) execute a
//!   closure inside the span and map its failure onto the span
//!
//! Without a tracer provider every span is inert: the handle is valid to use,
//! but nothing is recorded or exported.

mod session;

pub use session::TraceSession;

use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{
    FutureExt as _, SpanBuilder, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceId,
    Tracer as _,
};
use opentelemetry::{Context, Key, KeyValue};
use serde::Serialize;
use std::any::type_name;
use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;

use crate::telemetry::{Telemetry, INSTRUMENTATION_NAME};
use crate::value::{attributes_of, key_value, AttrValue};

/// Name given to spans started without one.
pub const DEFAULT_SPAN_NAME: &str = "unnamed-span";

#[derive(Debug, Clone, Copy)]
struct ErrorPolicy {
    record_error: bool,
    set_status: bool,
}

impl ErrorPolicy {
    fn apply<E: Display + ?Sized>(self, span: &SpanHandle, err: &E) {
        if self.record_error {
            span.record_exception(err);
        }
        if self.set_status {
            span.set_error(err.to_string());
        }
    }
}

/// A span being configured.
///
/// # Example
///
/// ```ignore
/// let order = telemetry
///     .trace("orders.create")
///     .parent(&cx)
///     .server()
///     .attr("order.items", items.len())
///     .run(|cx| create_order(cx, items))?;
/// ```
#[must_use]
pub struct TraceBuilder<'a> {
    telemetry: &'a Telemetry,
    name: Cow<'static, str>,
    parent: Option<Context>,
    kind: SpanKind,
    tracer_name: Cow<'static, str>,
    attributes: Vec<KeyValue>,
    errors: ErrorPolicy,
}

impl<'a> TraceBuilder<'a> {
    pub(crate) fn new(telemetry: &'a Telemetry) -> Self {
        Self {
            telemetry,
            name: Cow::Borrowed(""),
            parent: None,
            kind: SpanKind::Internal,
            tracer_name: Cow::Borrowed(INSTRUMENTATION_NAME),
            attributes: Vec::new(),
            errors: ErrorPolicy {
                record_error: true,
                set_status: true,
            },
        }
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Context whose active span becomes the parent.
    ///
    /// Defaults to the thread's current context, so spans started inside
    /// [`run`](Self::run) nest without passing the context explicitly.
    pub fn parent(mut self, cx: &Context) -> Self {
        self.parent = Some(cx.clone());
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn server(self) -> Self {
        self.kind(SpanKind::Server)
    }

    pub fn client(self) -> Self {
        self.kind(SpanKind::Client)
    }

    pub fn producer(self) -> Self {
        self.kind(SpanKind::Producer)
    }

    pub fn consumer(self) -> Self {
        self.kind(SpanKind::Consumer)
    }

    /// Instrumentation scope the span is reported under.
    pub fn tracer_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tracer_name = name.into();
        self
    }

    pub fn attr(mut self, key: impl Into<Key>, value: impl Into<AttrValue>) -> Self {
        self.attributes.push(key_value(key, value));
        self
    }

    pub fn attrs<I, K, V>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<AttrValue>,
    {
        self.attributes
            .extend(attrs.into_iter().map(|(k, v)| key_value(k, v)));
        self
    }

    /// One attribute per top-level member of a serializable struct or map.
    pub fn attrs_from<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.attrs(attributes_of(value))
    }

    /// Record a failed [`run`](Self::run) as an `exception` event. On by default.
    pub fn record_error(mut self, enabled: bool) -> Self {
        self.errors.record_error = enabled;
        self
    }

    /// Set Error status on a failed [`run`](Self::run). On by default.
    pub fn set_status_on_error(mut self, enabled: bool) -> Self {
        self.errors.set_status = enabled;
        self
    }

    /// Start the span and return the context that carries it.
    pub fn start(self) -> (Context, SpanHandle) {
        let name = if self.name.is_empty() {
            Cow::Borrowed(DEFAULT_SPAN_NAME)
        } else {
            self.name
        };
        let parent = self.parent.unwrap_or_else(Context::current);
        let builder = SpanBuilder::from_name(name)
            .with_kind(self.kind)
            .with_attributes(self.attributes);

        let cx = match self.telemetry.tracer(self.tracer_name) {
            Some(tracer) => {
                let span = tracer.build_with_context(builder, &parent);
                parent.with_span(span)
            }
            None => {
                let span = NoopTracer::new().build_with_context(builder, &parent);
                parent.with_span(span)
            }
        };
        (cx.clone(), SpanHandle { cx })
    }

    /// Start the span and bind it to a scope that ends it on drop.
    pub fn start_scope(self) -> SpanScope {
        let (cx, span) = self.start();
        SpanScope {
            cx,
            span: Some(span),
        }
    }

    /// Run `f` inside the span.
    ///
    /// The new context is attached for the duration of `f`. The span ends on
    /// every exit path, including a panic. On failure the error is recorded
    /// according to [`record_error`](Self::record_error) and
    /// [`set_status_on_error`](Self::set_status_on_error); on success the
    /// status is left unset.
    pub fn run<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
        E: Display,
    {
        let errors = self.errors;
        let scope = self.start_scope();
        let result = {
            let _guard = scope.cx.clone().attach();
            f(&scope.cx)
        };
        if let (Err(err), Some(span)) = (&result, &scope.span) {
            errors.apply(span, err);
        }
        result
    }

    /// Async counterpart of [`run`](Self::run).
    ///
    /// The context is attached on every poll of the future.
    pub async fn run_async<T, E, F, Fut>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let errors = self.errors;
        let scope = self.start_scope();
        let result = f(scope.cx.clone()).with_context(scope.cx.clone()).await;
        if let (Err(err), Some(span)) = (&result, &scope.span) {
            errors.apply(span, err);
        }
        result
    }
}

/// Handle to a started span.
///
/// All operations are no-ops once the span has ended or when the span is
/// inert.
#[derive(Debug, Clone)]
pub struct SpanHandle {
    cx: Context,
}

impl SpanHandle {
    /// The context carrying this span.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.cx.span().span_context().span_id()
    }

    pub fn is_recording(&self) -> bool {
        self.cx.span().is_recording()
    }

    /// Set an attribute; a later value for the same key replaces the earlier.
    pub fn set_attribute(&self, key: impl Into<Key>, value: impl Into<AttrValue>) {
        self.cx.span().set_attribute(key_value(key, value));
    }

    pub fn set_attributes<I, K, V>(&self, attrs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<AttrValue>,
    {
        self.cx
            .span()
            .set_attributes(attrs.into_iter().map(|(k, v)| key_value(k, v)));
    }

    pub fn set_attributes_from<T: Serialize + ?Sized>(&self, value: &T) {
        self.set_attributes(attributes_of(value));
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Add an `exception` event describing `err`.
    pub fn record_exception<E: Display + ?Sized>(&self, err: &E) {
        self.add_event(
            "exception",
            vec![
                KeyValue::new("exception.message", err.to_string()),
                KeyValue::new("exception.type", type_name::<E>()),
            ],
        );
    }

    pub fn set_ok(&self) {
        self.cx.span().set_status(Status::Ok);
    }

    pub fn set_error(&self, message: impl Into<Cow<'static, str>>) {
        self.cx.span().set_status(Status::error(message));
    }

    /// Record `err` and mark the span failed with its message.
    pub fn fail<E: Display + ?Sized>(&self, err: &E) {
        self.record_exception(err);
        self.set_error(err.to_string());
    }

    /// End the span. Ending an already ended span does nothing.
    pub fn end(&self) {
        self.cx.span().end();
    }
}

/// A context and its span, ending the span when dropped.
#[derive(Debug, Default)]
pub struct SpanScope {
    cx: Context,
    span: Option<SpanHandle>,
}

impl SpanScope {
    /// A scope over `cx` that owns no span.
    pub fn detached(cx: &Context) -> Self {
        Self {
            cx: cx.clone(),
            span: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span(&self) -> Option<&SpanHandle> {
        self.span.as_ref()
    }

    /// End the span, if any. Safe to call repeatedly.
    pub fn done(&self) {
        if let Some(span) = &self.span {
            span.end();
        }
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.done();
    }
}
