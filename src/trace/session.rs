//! Multi-level span bookkeeping for handlers that step through phases.
//!
//! A [`TraceSession`] holds a root span, the current phase span and at most
//! one child of that phase.

use opentelemetry::{Context, Key};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;

use super::{SpanHandle, SpanScope};
use crate::telemetry::Telemetry;
use crate::value::AttrValue;

/// A root span with one current span and one child span beneath it.
///
/// Suited to handlers that step through a few named phases. Opening a new
/// span or child ends the one it replaces. Every operation tolerates the
/// target span being absent, and dropping the session ends child, span and
/// root in that order.
///
/// # Example
///
/// ```ignore
/// let mut session = TraceSession::new(&telemetry, &cx, "import");
/// session.span("parse").span_attr("rows", rows.len());
/// session.child_span("validate");
/// if let Err(e) = validate(&rows) {
///     session.child_error(&e);
/// }
/// session.close();
/// ```
pub struct TraceSession<'a> {
    telemetry: &'a Telemetry,
    root: SpanScope,
    span: Option<(Context, SpanHandle)>,
    child: Option<SpanHandle>,
}

impl<'a> TraceSession<'a> {
    pub fn new(
        telemetry: &'a Telemetry,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
    ) -> Self {
        let root = telemetry.trace(name).parent(parent).start_scope();
        Self {
            telemetry,
            root,
            span: None,
            child: None,
        }
    }

    /// Context of the innermost open span.
    pub fn context(&self) -> &Context {
        match (&self.child, &self.span) {
            (Some(child), _) => child.context(),
            (None, Some((cx, _))) => cx,
            (None, None) => self.root.context(),
        }
    }

    /// Open the current span under the root.
    pub fn span(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.end_span();
        let started = self.telemetry.trace(name).parent(self.root.context()).start();
        self.span = Some(started);
        self
    }

    pub fn span_attr(&mut self, key: impl Into<Key>, value: impl Into<AttrValue>) -> &mut Self {
        if let Some((_, span)) = &self.span {
            span.set_attribute(key, value);
        }
        self
    }

    pub fn span_attrs<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        if let Some((_, span)) = &self.span {
            span.set_attributes_from(value);
        }
        self
    }

    pub fn span_error<E: Display + ?Sized>(&mut self, err: &E) -> &mut Self {
        if let Some((_, span)) = &self.span {
            span.fail(err);
        }
        self
    }

    pub fn span_success(&mut self) -> &mut Self {
        if let Some((_, span)) = &self.span {
            span.set_ok();
        }
        self
    }

    /// End the current span, and its child first.
    pub fn end_span(&mut self) -> &mut Self {
        self.end_child();
        if let Some((_, span)) = self.span.take() {
            span.end();
        }
        self
    }

    /// Open a child under the current span. Without a current span this
    /// does nothing.
    pub fn child_span(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.end_child();
        if let Some((cx, _)) = &self.span {
            let (_, child) = self.telemetry.trace(name).parent(cx).start();
            self.child = Some(child);
        }
        self
    }

    pub fn child_attr(&mut self, key: impl Into<Key>, value: impl Into<AttrValue>) -> &mut Self {
        if let Some(child) = &self.child {
            child.set_attribute(key, value);
        }
        self
    }

    pub fn child_attrs<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        if let Some(child) = &self.child {
            child.set_attributes_from(value);
        }
        self
    }

    pub fn child_error<E: Display + ?Sized>(&mut self, err: &E) -> &mut Self {
        if let Some(child) = &self.child {
            child.fail(err);
        }
        self
    }

    pub fn child_success(&mut self) -> &mut Self {
        if let Some(child) = &self.child {
            child.set_ok();
        }
        self
    }

    pub fn end_child(&mut self) -> &mut Self {
        if let Some(child) = self.child.take() {
            child.end();
        }
        self
    }

    /// End child, span and root.
    pub fn close(self) {}
}

impl Drop for TraceSession<'_> {
    fn drop(&mut self) {
        self.end_span();
        self.root.done();
    }
}
