use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

/// An asynchronous server-pushed notification in streaming mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message type; `"type"` on the wire. `"unknown"` when absent.
    pub kind: String,
    pub payload: Option<Value>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, Value>,
}

impl Message {
    pub fn data(
        payload: Value,
        source: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            kind: "data".to_string(),
            payload: Some(payload),
            source: source.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: "system".to_string(),
            payload: Some(Value::String(text.into())),
            source: "system".to_string(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            payload: Some(Value::String(text.into())),
            source: "system".to_string(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Build a message from a decoded JSON object. Total: degenerate input
    /// falls back to defaults instead of failing.
    ///
    /// * missing or unparsable `timestamp` becomes the current instant;
    /// * `payload` falls back to a `data` key when absent;
    /// * non-canonical top-level keys (`topic`, `channel`, ...) are folded
    ///   into `metadata` so backends that flatten their push frames still
    ///   produce filterable messages.
    pub fn from_value(value: Value) -> Self {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Self {
                    kind: "unknown".to_string(),
                    payload: Some(other),
                    source: "unknown".to_string(),
                    timestamp: Utc::now(),
                    metadata: BTreeMap::new(),
                };
            }
        };

        let kind = string_field(&mut object, "type").unwrap_or_else(|| "unknown".to_string());
        let source = string_field(&mut object, "source").unwrap_or_else(|| "unknown".to_string());
        let timestamp = object
            .remove("timestamp")
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let payload = object
            .remove("payload")
            .or_else(|| object.remove("data"))
            .filter(|v| !v.is_null());

        let mut metadata: BTreeMap<String, Value> = match object.remove("metadata") {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        for (key, value) in object {
            metadata.entry(key).or_insert(value);
        }

        Self {
            kind,
            payload,
            source,
            timestamp,
            metadata,
        }
    }

    /// Canonical JSON object form; inverse of [`Message::from_value`] for
    /// inputs that use the canonical keys.
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.kind,
            "payload": self.payload.clone().unwrap_or(Value::Null),
            "source": self.source,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "metadata": self.metadata,
        })
    }

    /// Dotted-path lookup context used by filter evaluation:
    /// `{type, payload, source, timestamp, metadata}`.
    pub fn context(&self) -> Value {
        self.to_value()
    }

    /// Payload rendered as display text: strings verbatim, anything else as
    /// compact JSON, absent payload as the empty string.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

fn string_field(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            // Keep non-string values somewhere visible rather than dropping.
            object.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}
