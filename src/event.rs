//! Outbound telemetry events.
//!
//! Every log line or metric handed to the SDK becomes an [`OutboundEvent`],
//! which is serialized into the `{"type": ..., "payload": {...}}` envelope the
//! streaming endpoint expects. Events are ephemeral: they are never persisted
//! and never retried.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Log severity levels accepted by the monitoring service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Message body accepted by `Session::send_log`.
///
/// Structured payloads are rendered as compact JSON before they leave the
/// process, so the service always receives a string `message`.
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessage {
    Text(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

impl LogMessage {
    /// Resolve the message to the text sent on the wire.
    pub fn into_text(self) -> String {
        match self {
            LogMessage::Text(text) => text,
            LogMessage::Structured(map) => serde_json::Value::Object(map).to_string(),
        }
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        LogMessage::Text(text)
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        LogMessage::Text(text.to_string())
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for LogMessage {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        LogMessage::Structured(map)
    }
}

/// Payload of a `log` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub instance_id: String,
}

/// Payload of a `metric` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(serialize_with = "finite_f64")]
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub instance_id: String,
}

/// JSON has no NaN or infinity, and serde_json would quietly write `null`.
fn finite_f64<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "metric value {} is not a finite number",
            value
        )));
    }
    serializer.serialize_f64(*value)
}

/// A log or metric wrapped for transmission.
///
/// Serializes as `{"type": "log" | "metric", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum OutboundEvent {
    Log(LogRecord),
    Metric(MetricRecord),
}

impl OutboundEvent {
    /// Build a log event stamped with the current time.
    pub fn log(
        instance_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<LogMessage>,
    ) -> Self {
        OutboundEvent::Log(LogRecord {
            timestamp: Utc::now(),
            level,
            message: message.into().into_text(),
            instance_id: instance_id.into(),
        })
    }

    /// Build a metric event stamped with the current time.
    pub fn metric(
        instance_id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        tags: HashMap<String, String>,
    ) -> Self {
        OutboundEvent::Metric(MetricRecord {
            timestamp: Utc::now(),
            name: name.into(),
            value,
            tags,
            instance_id: instance_id.into(),
        })
    }

    /// Frame type name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Log(_) => "log",
            OutboundEvent::Metric(_) => "metric",
        }
    }

    /// Serialize into the JSON text frame sent over the channel.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_log_level_serialization() {
        let level = LogLevel::Warn;
        let json = serde_json::to_string(&level).unwrap();
        assert_eq!(json, "\"warn\"");

        let parsed: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(parsed, LogLevel::Error);
    }

    #[test]
    fn test_log_level_default_and_display() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_log_envelope_shape() {
        let event = OutboundEvent::log("api-1", LogLevel::Info, "x");
        let frame: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();

        assert_eq!(frame["type"], "log");
        assert_eq!(frame["payload"]["message"], "x");
        assert_eq!(frame["payload"]["level"], "info");
        assert_eq!(frame["payload"]["instanceId"], "api-1");
        assert!(frame["payload"]["timestamp"].is_string());
        assert_eq!(frame.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_metric_envelope_shape() {
        let mut tags = HashMap::new();
        tags.insert("region".to_string(), "eu-west-1".to_string());

        let event = OutboundEvent::metric("api-1", "latency_ms", 12.5, tags);
        assert_eq!(event.kind(), "metric");

        let frame: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(frame["type"], "metric");
        assert_eq!(frame["payload"]["name"], "latency_ms");
        assert_eq!(frame["payload"]["value"], 12.5);
        assert_eq!(frame["payload"]["tags"], json!({"region": "eu-west-1"}));
        assert_eq!(frame["payload"]["instanceId"], "api-1");
    }

    #[test]
    fn test_non_finite_metric_value_fails_to_serialize() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let event = OutboundEvent::metric("api-1", "latency_ms", value, HashMap::new());
            let err = event.to_frame().unwrap_err();
            assert!(err.to_string().contains("not a finite number"));
        }
    }

    #[test]
    fn test_structured_message_rendered_as_json_text() {
        let mut map = serde_json::Map::new();
        map.insert("order".to_string(), json!(42));

        let event = OutboundEvent::log("api-1", LogLevel::Error, map);
        match event {
            OutboundEvent::Log(record) => assert_eq!(record.message, r#"{"order":42}"#),
            other => panic!("expected log event, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_parses_back() {
        let event = OutboundEvent::log("api-1", LogLevel::Debug, "boot");
        let parsed: OutboundEvent = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }
}
