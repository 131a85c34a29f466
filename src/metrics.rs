//! Named, lazily created metric instruments.
//!
//! Instruments are created on first use and cached by name for the lifetime of
//! the registry:
//! - counters record `u64` deltas (default unit `"1"`)
//! - histograms record `f64` values (default unit `"ms"`)
//!
//! Unit and description only apply when an instrument is first created.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{Context, Key, KeyValue};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::value::{key_value, AttrValue};

/// Default unit for counters.
pub const DEFAULT_COUNTER_UNIT: &str = "1";

/// Default unit for histograms.
pub const DEFAULT_HISTOGRAM_UNIT: &str = "ms";

const MAX_NAME_LEN: usize = 255;

/// Instrument cache keyed by name, one map per instrument kind.
pub struct MetricRegistry {
    meter: Option<Meter>,
    counters: Mutex<HashMap<String, Counter<u64>>>,
    histograms: Mutex<HashMap<String, Histogram<f64>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MetricRegistry {
    /// A registry backed by `meter`, or a disabled one for `None`.
    pub fn new(meter: Option<Meter>) -> Self {
        Self {
            meter,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.meter.is_some() && !self.closed.load(Ordering::Acquire)
    }

    /// Number of cached counters.
    pub fn counter_count(&self) -> usize {
        lock(&self.counters).len()
    }

    /// Number of cached histograms.
    pub fn histogram_count(&self) -> usize {
        lock(&self.histograms).len()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn counter(&self, name: &str, unit: &str, description: &str) -> Option<Counter<u64>> {
        let meter = self.active_meter()?;
        let mut counters = lock(&self.counters);
        if let Some(counter) = counters.get(name) {
            return Some(counter.clone());
        }
        validate_name(name)?;

        let counter = meter
            .u64_counter(name.to_string())
            .with_description(description.to_string())
            .with_unit(unit.to_string())
            .init();
        counters.insert(name.to_string(), counter.clone());
        Some(counter)
    }

    fn histogram(&self, name: &str, unit: &str, description: &str) -> Option<Histogram<f64>> {
        let meter = self.active_meter()?;
        let mut histograms = lock(&self.histograms);
        if let Some(histogram) = histograms.get(name) {
            return Some(histogram.clone());
        }
        validate_name(name)?;

        let histogram = meter
            .f64_histogram(name.to_string())
            .with_description(description.to_string())
            .with_unit(unit.to_string())
            .init();
        histograms.insert(name.to_string(), histogram.clone());
        Some(histogram)
    }

    fn active_meter(&self) -> Option<&Meter> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.meter.as_ref()
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("enabled", &self.is_enabled())
            .field("counters", &self.counter_count())
            .field("histograms", &self.histogram_count())
            .finish()
    }
}

/// Check an instrument name against the OpenTelemetry naming rules.
fn validate_name(name: &str) -> Option<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));
    if !valid {
        tracing::debug!(instrument = name, "invalid instrument name, measurement dropped");
        return None;
    }
    Some(())
}

/// A counter measurement being configured.
///
/// # Example
///
/// ```ignore
/// telemetry
///     .counter("orders_created_total")
///     .attr("region", "eu-west")
///     .add(&cx, 1);
/// ```
#[must_use]
pub struct CounterBuilder<'a> {
    registry: &'a MetricRegistry,
    name: String,
    unit: Cow<'static, str>,
    description: Cow<'static, str>,
    attributes: Vec<KeyValue>,
}

impl<'a> CounterBuilder<'a> {
    pub(crate) fn new(registry: &'a MetricRegistry, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            unit: Cow::Borrowed(DEFAULT_COUNTER_UNIT),
            description: Cow::Borrowed(""),
            attributes: Vec::new(),
        }
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

    /// Unit used if this call creates the instrument. Empty keeps the default.
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        let unit = unit.into();
        if !unit.is_empty() {
            self.unit = unit;
        }
        self
    }

    /// Description used if this call creates the instrument.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Add `delta` under the configured attributes with `cx` as the current
    /// context.
    pub fn add(self, cx: &Context, delta: u64) {
        let Some(counter) = self
            .registry
            .counter(&self.name, &self.unit, &self.description)
        else {
            return;
        };
        let _guard = cx.clone().attach();
        counter.add(delta, &self.attributes);
    }
}

/// A histogram measurement being configured.
#[must_use]
pub struct HistogramBuilder<'a> {
    registry: &'a MetricRegistry,
    name: String,
    unit: Cow<'static, str>,
    description: Cow<'static, str>,
    attributes: Vec<KeyValue>,
}

impl<'a> HistogramBuilder<'a> {
    pub(crate) fn new(registry: &'a MetricRegistry, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            unit: Cow::Borrowed(DEFAULT_HISTOGRAM_UNIT),
            description: Cow::Borrowed(""),
            attributes: Vec::new(),
        }
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

    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        let unit = unit.into();
        if !unit.is_empty() {
            self.unit = unit;
        }
        self
    }

    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Record `value` under the configured attributes with `cx` as the
    /// current context.
    pub fn record(self, cx: &Context, value: f64) {
        let Some(histogram) = self
            .registry
            .histogram(&self.name, &self.unit, &self.description)
        else {
            return;
        };
        let _guard = cx.clone().attach();
        histogram.record(value, &self.attributes);
    }
}
