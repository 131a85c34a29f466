//! Typed attribute values shared by spans, metrics and log fields.
//!
//! Every attribute or field value is one of four kinds:
//! - string
//! - boolean
//! - 64-bit signed integer (all narrower integer widths are promoted)
//! - 64-bit float
//!
//! Anything else is stored as its string representation, either through
//! [`AttrValue::display`] or, for unsigned values that do not fit in an `i64`,
//! automatically by the `From` conversion.

use opentelemetry::logs::AnyValue;
use opentelemetry::{Key, KeyValue, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;

/// A closed set of attribute value kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl AttrValue {
    /// Fallback for any value without a dedicated conversion.
    pub fn display(value: impl fmt::Display) -> Self {
        AttrValue::Str(value.to_string())
    }

    /// Convert to an OpenTelemetry span/metric attribute value.
    pub fn to_otel(&self) -> Value {
        match self {
            AttrValue::Str(s) => Value::String(s.clone().into()),
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::I64(i) => Value::I64(*i),
            AttrValue::F64(f) => Value::F64(*f),
        }
    }

    /// Convert to a remote log attribute.
    ///
    /// The log pipeline only distinguishes strings, booleans and integers;
    /// floats are carried as their string form.
    pub fn to_log_value(&self) -> AnyValue {
        match self {
            AttrValue::Str(s) => AnyValue::String(s.clone().into()),
            AttrValue::Bool(b) => AnyValue::Boolean(*b),
            AttrValue::I64(i) => AnyValue::Int(*i),
            AttrValue::F64(f) => AnyValue::String(f.to_string().into()),
        }
    }

    /// Convert to a JSON value for structured local output.
    pub fn to_json(&self) -> JsonValue {
        match self {
            AttrValue::Str(s) => JsonValue::String(s.clone()),
            AttrValue::Bool(b) => JsonValue::Bool(*b),
            AttrValue::I64(i) => JsonValue::from(*i),
            AttrValue::F64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
        }
    }

    fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => AttrValue::Str(s),
            JsonValue::Bool(b) => AttrValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    AttrValue::F64(f)
                } else {
                    AttrValue::Str(n.to_string())
                }
            }
            other => AttrValue::Str(other.to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::I64(i) => write!(f, "{i}"),
            AttrValue::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::Str(value.clone())
    }
}

impl From<Cow<'_, str>> for AttrValue {
    fn from(value: Cow<'_, str>) -> Self {
        AttrValue::Str(value.into_owned())
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        AttrValue::F64(f64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::F64(value)
    }
}

macro_rules! lossless_int {
    ($($t:ty),*) => {
        $(impl From<$t> for AttrValue {
            fn from(value: $t) -> Self {
                AttrValue::I64(i64::from(value))
            }
        })*
    };
}

lossless_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! wide_int {
    ($($t:ty),*) => {
        $(impl From<$t> for AttrValue {
            fn from(value: $t) -> Self {
                i64::try_from(value)
                    .map(AttrValue::I64)
                    .unwrap_or_else(|_| AttrValue::Str(value.to_string()))
            }
        })*
    };
}

wide_int!(u64, usize, isize, i128, u128);

/// Build an OpenTelemetry key/value pair from anything convertible.
pub(crate) fn key_value(key: impl Into<Key>, value: impl Into<AttrValue>) -> KeyValue {
    KeyValue::new(key, value.into().to_otel())
}

/// Flatten a serializable struct or map into attribute pairs.
///
/// Top-level object members become one attribute each; nested arrays and
/// objects are carried as their JSON text. Values that do not serialize to a
/// JSON object yield no attributes.
pub fn attributes_of<T: Serialize + ?Sized>(value: &T) -> Vec<(String, AttrValue)> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(map)) => map
            .into_iter()
            .map(|(key, value)| (key, AttrValue::from_json(value)))
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!(error = %e, "attribute flattening failed");
            Vec::new()
        }
    }
}
