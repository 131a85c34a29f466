//! Transport header bags that trace identity can be read from and written to.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tonic::metadata::{Ascii, KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// A string-keyed header bag.
///
/// Writes replace any existing value for the key. Keys or values the
/// transport cannot represent are dropped silently.
pub trait Carrier {
    fn get(&self, key: &str) -> Option<&str>;
    fn set(&mut self, key: &str, value: String);
    fn keys(&self) -> Vec<&str>;
}

impl Carrier for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|value| value.to_str().ok())
    }

    fn set(&mut self, key: &str, value: String) {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) else {
            tracing::debug!(key, "header not representable, skipped");
            return;
        };
        self.insert(name, value);
    }

    fn keys(&self) -> Vec<&str> {
        HeaderMap::keys(self).map(HeaderName::as_str).collect()
    }
}

impl Carrier for MetadataMap {
    fn get(&self, key: &str) -> Option<&str> {
        MetadataMap::get(self, key).and_then(|value| value.to_str().ok())
    }

    fn set(&mut self, key: &str, value: String) {
        let (Ok(key), Ok(value)) = (
            MetadataKey::<Ascii>::from_bytes(key.as_bytes()),
            MetadataValue::<Ascii>::try_from(value.as_str()),
        ) else {
            tracing::debug!(key, "metadata entry not representable, skipped");
            return;
        };
        self.insert(key, value);
    }

    fn keys(&self) -> Vec<&str> {
        MetadataMap::keys(self)
            .map(|key| match key {
                KeyRef::Ascii(key) => key.as_str(),
                KeyRef::Binary(key) => key.as_str(),
            })
            .collect()
    }
}

/// Message header tables, as carried by AMQP-style brokers.
///
/// Only string-valued entries are readable.
impl Carrier for HashMap<String, JsonValue> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).and_then(JsonValue::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), JsonValue::String(value));
    }

    fn keys(&self) -> Vec<&str> {
        HashMap::keys(self).map(String::as_str).collect()
    }
}

impl Carrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }

    fn keys(&self) -> Vec<&str> {
        HashMap::keys(self).map(String::as_str).collect()
    }
}

/// Adapts a [`Carrier`] to the propagator's read side.
pub(crate) struct CarrierExtractor<'a, C: ?Sized>(pub &'a C);

impl<C: Carrier + ?Sized> Extractor for CarrierExtractor<'_, C> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys()
    }
}

/// Adapts a [`Carrier`] to the propagator's write side.
pub(crate) struct CarrierInjector<'a, C: ?Sized>(pub &'a mut C);

impl<C: Carrier + ?Sized> Injector for CarrierInjector<'_, C> {
    fn set(&mut self, key: &str, value: String) {
        self.0.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_last_write_wins() {
        let mut headers = HeaderMap::new();
        Carrier::set(&mut headers, "x-trace-id", "first".into());
        Carrier::set(&mut headers, "x-trace-id", "second".into());

        assert_eq!(Carrier::get(&headers, "x-trace-id"), Some("second"));
        assert_eq!(headers.get_all("x-trace-id").iter().count(), 1);
    }

    #[test]
    fn test_header_map_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static("value"));
        assert_eq!(Carrier::get(&headers, "TraceParent"), Some("value"));
    }

    #[test]
    fn test_header_map_skips_invalid_value() {
        let mut headers = HeaderMap::new();
        Carrier::set(&mut headers, "baggage", "bad\nvalue".into());
        assert!(Carrier::keys(&headers).is_empty());
    }

    #[test]
    fn test_metadata_map_roundtrip() {
        let mut metadata = MetadataMap::new();
        Carrier::set(&mut metadata, "traceparent", "00-abc".into());
        assert_eq!(Carrier::get(&metadata, "traceparent"), Some("00-abc"));
        assert_eq!(Carrier::keys(&metadata), vec!["traceparent"]);
    }

    #[test]
    fn test_json_table_ignores_non_string_values() {
        let mut table: HashMap<String, JsonValue> = HashMap::new();
        table.insert("retries".into(), JsonValue::from(3));
        Carrier::set(&mut table, "x-span-id", "00f067aa0ba902b7".into());

        assert_eq!(Carrier::get(&table, "retries"), None);
        assert_eq!(Carrier::get(&table, "x-span-id"), Some("00f067aa0ba902b7"));
    }
}
