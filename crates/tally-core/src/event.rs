//! The telemetry event wire type and its structural validation.
//!
//! Events arrive as a JSON array from internal tools:
//!
//! ```json
//! [{"app": "composer", "stage": "PROD", "type": "USER_ACTION_1",
//!   "value": 1, "eventTime": "2020-09-03T07:51:27.669Z",
//!   "tags": {"path": "/content/abc"}}]
//! ```
//!
//! Validation is structural rather than schema-file driven: required
//! fields present and non-empty, `eventTime` a parseable ISO-8601
//! timestamp, `value` a number or boolean, tag values scalar. All
//! failures are collected (not just the first) so API callers get the
//! complete picture in one 400 response.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single usage-telemetry event.
///
/// Immutable once created; persisted verbatim in the archive. The only
/// rewriting ever applied is the stream-record transform in
/// [`TelemetryEvent::to_stream_record`], at forwarding time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// The application sending the event.
    pub app: String,

    /// The application stage, e.g. `CODE` or `PROD`.
    pub stage: String,

    /// The type of event, e.g. `USER_ACTION_1`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The value of the event. Producers normalise booleans to 0/1,
    /// but both shapes are accepted on the wire.
    pub value: MetricValue,

    /// When the event occurred (not when it was queued or sent),
    /// ISO-8601. Kept as the original string so archived bytes match
    /// the producer's exactly.
    #[serde(rename = "eventTime")]
    pub event_time: String,

    /// Optional metadata. Rewritten to `_tags` on the way to the
    /// stream: `tags` is a reserved field name downstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, TagValue>>,
}

/// An event value: a number or a boolean.
///
/// Numbers keep their original JSON token: an integer `1` archives as
/// `1`, never `1.0`, and integers beyond f64 precision are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(serde_json::Number),
    Flag(bool),
}

/// A tag value: any JSON scalar except null. Numeric tokens are kept
/// verbatim, as in [`MetricValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

/// One structural validation failure, locating the offending field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// JSON-pointer-ish path into the payload, e.g. `[2].eventTime`.
    pub path: String,
    /// What was wrong with it.
    pub message: String,
}

impl ValidationFailure {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a JSON payload as a non-empty array of telemetry events.
///
/// This is the single validation used at both ingestion time and
/// archive re-read time, so the two paths cannot drift.
///
/// # Errors
///
/// [`Error::InvalidPayload`] carrying every failure found.
pub fn validate_events(payload: &Value) -> Result<Vec<TelemetryEvent>> {
    let items = match payload.as_array() {
        Some(items) => items,
        None => {
            return Err(Error::InvalidPayload(vec![ValidationFailure::new(
                "",
                "expected a JSON array of telemetry events",
            )]));
        }
    };

    let mut failures = Vec::new();
    for (index, item) in items.iter().enumerate() {
        check_event(&format!("[{index}]"), item, &mut failures);
    }

    if !failures.is_empty() {
        return Err(Error::InvalidPayload(failures));
    }

    // Structure is known good, so deserialization cannot fail other
    // than by a bug in check_event - surface that as a JSON error.
    let events = serde_json::from_value(payload.clone())?;
    Ok(events)
}

/// Validate a single event object.
pub fn validate_event(payload: &Value) -> Result<TelemetryEvent> {
    let mut failures = Vec::new();
    check_event("", payload, &mut failures);
    if !failures.is_empty() {
        return Err(Error::InvalidPayload(failures));
    }
    let event = serde_json::from_value(payload.clone())?;
    Ok(event)
}

fn check_event(path: &str, item: &Value, failures: &mut Vec<ValidationFailure>) {
    let obj = match item.as_object() {
        Some(obj) => obj,
        None => {
            failures.push(ValidationFailure::new(path, "expected an object"));
            return;
        }
    };

    for field in ["app", "stage", "type"] {
        match obj.get(field).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => {}
            _ => failures.push(ValidationFailure::new(
                format!("{path}.{field}"),
                "must be a non-empty string",
            )),
        }
    }

    match obj.get("value") {
        Some(v) if v.is_number() || v.is_boolean() => {}
        Some(_) => failures.push(ValidationFailure::new(
            format!("{path}.value"),
            "must be a number or a boolean",
        )),
        None => failures.push(ValidationFailure::new(
            format!("{path}.value"),
            "is required",
        )),
    }

    match obj.get("eventTime").and_then(Value::as_str) {
        Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => {}
        Some(_) => failures.push(ValidationFailure::new(
            format!("{path}.eventTime"),
            "not a valid ISO-8601 timestamp",
        )),
        None => failures.push(ValidationFailure::new(
            format!("{path}.eventTime"),
            "is required",
        )),
    }

    if let Some(tags) = obj.get("tags") {
        match tags.as_object() {
            Some(map) => {
                for (key, value) in map {
                    if !(value.is_string() || value.is_number() || value.is_boolean()) {
                        failures.push(ValidationFailure::new(
                            format!("{path}.tags.{key}"),
                            "tag values must be strings, numbers or booleans",
                        ));
                    }
                }
            }
            None => failures.push(ValidationFailure::new(
                format!("{path}.tags"),
                "must be an object",
            )),
        }
    }
}

impl TelemetryEvent {
    /// Transform into the JSON object shipped to the analytics stream.
    ///
    /// The record is the original event plus `@timestamp` (copy of
    /// `eventTime`) and with `tags` renamed to `_tags`. Redrive passes
    /// a stable `id` so downstream indexing overwrites rather than
    /// duplicates a re-driven event.
    pub fn to_stream_record(&self, id: Option<&str>) -> Value {
        // Serializing a validated event cannot fail.
        let mut obj = match serde_json::to_value(self) {
            Ok(Value::Object(obj)) => obj,
            _ => unreachable!("TelemetryEvent serializes to an object"),
        };
        obj.insert(
            "@timestamp".to_string(),
            Value::String(self.event_time.clone()),
        );
        if let Some(tags) = obj.remove("tags") {
            obj.insert("_tags".to_string(), tags);
        }
        if let Some(id) = id {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!([{
            "app": "app-1",
            "stage": "CODE",
            "type": "USER_ACTION_1",
            "value": 1,
            "eventTime": "2020-09-03T07:51:27.669Z",
        }])
    }

    #[test]
    fn accepts_minimal_valid_event() {
        let events = validate_events(&sample()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].app, "app-1");
        assert_eq!(events[0].event_type, "USER_ACTION_1");
        assert_eq!(events[0].value, MetricValue::Number(1.into()));
    }

    #[test]
    fn accepts_boolean_value_and_tags() {
        let payload = json!([{
            "app": "app-1",
            "stage": "PROD",
            "type": "FEATURE_SWITCH",
            "value": true,
            "eventTime": "2020-09-03T07:51:27.669Z",
            "tags": {"path": "/content", "count": 3, "enabled": false},
        }]);
        let events = validate_events(&payload).unwrap();
        assert_eq!(events[0].value, MetricValue::Flag(true));
        let tags = events[0].tags.as_ref().unwrap();
        assert_eq!(tags.get("path"), Some(&TagValue::from("/content")));
        assert_eq!(tags.get("count"), Some(&TagValue::Number(3.into())));
    }

    #[test]
    fn rejects_non_array_payload() {
        let err = validate_events(&json!({"app": "a"})).unwrap_err();
        let failures = err.validation_failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("array"));
    }

    #[test]
    fn collects_all_failures_with_paths() {
        let payload = json!([
            {"app": "", "stage": "CODE", "type": "T", "value": 1,
             "eventTime": "2020-09-03T07:51:27.669Z"},
            {"app": "a", "stage": "CODE", "type": "T", "value": "nope",
             "eventTime": "not-a-date"},
        ]);
        let err = validate_events(&payload).unwrap_err();
        let failures = err.validation_failures().unwrap();
        let paths: Vec<&str> = failures.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"[0].app"));
        assert!(paths.contains(&"[1].value"));
        assert!(paths.contains(&"[1].eventTime"));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = validate_events(&json!([{}])).unwrap_err();
        let failures = err.validation_failures().unwrap();
        let paths: Vec<&str> = failures.iter().map(|f| f.path.as_str()).collect();
        for expected in ["[0].app", "[0].stage", "[0].type", "[0].value", "[0].eventTime"] {
            assert!(paths.contains(&expected), "missing failure for {expected}");
        }
    }

    #[test]
    fn rejects_nested_tag_values() {
        let payload = json!([{
            "app": "a", "stage": "CODE", "type": "T", "value": 1,
            "eventTime": "2020-09-03T07:51:27.669Z",
            "tags": {"nested": {"not": "allowed"}},
        }]);
        let err = validate_events(&payload).unwrap_err();
        let failures = err.validation_failures().unwrap();
        assert_eq!(failures[0].path, "[0].tags.nested");
    }

    #[test]
    fn stream_record_aliases_timestamp_and_rewrites_tags() {
        let payload = json!([{
            "app": "a", "stage": "CODE", "type": "T", "value": 1,
            "eventTime": "2020-09-03T07:51:27.669Z",
            "tags": {"path": "/content"},
        }]);
        let events = validate_events(&payload).unwrap();
        let record = events[0].to_stream_record(None);

        assert_eq!(record["@timestamp"], "2020-09-03T07:51:27.669Z");
        assert_eq!(record["eventTime"], "2020-09-03T07:51:27.669Z");
        assert_eq!(record["_tags"]["path"], "/content");
        assert!(record.get("tags").is_none());
        assert!(record.get("id").is_none());
    }

    #[test]
    fn stream_record_carries_redrive_id() {
        let events = validate_events(&sample()).unwrap();
        let record = events[0].to_stream_record(Some("data/app-1/x#0"));
        assert_eq!(record["id"], "data/app-1/x#0");
    }

    #[test]
    fn integer_values_serialize_verbatim() {
        let payload = json!({
            "app": "app-1", "stage": "CODE", "type": "USER_ACTION_1", "value": 1,
            "eventTime": "2020-09-03T07:51:27.669Z",
            "tags": {"count": 3},
        });
        let event = validate_event(&payload).unwrap();
        assert_eq!(serde_json::to_value(&event).unwrap(), payload);

        // The serialized text keeps the integer tokens, no `1.0`.
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"value\":1,"), "float rewrite in {text}");
        assert!(text.contains("\"count\":3"), "float rewrite in {text}");
    }

    #[test]
    fn large_integers_keep_full_precision() {
        // 2^53 + 1 is not representable as f64.
        let payload = json!({
            "app": "a", "stage": "CODE", "type": "T", "value": 9_007_199_254_740_993i64,
            "eventTime": "2020-09-03T07:51:27.669Z",
        });
        let event = validate_event(&payload).unwrap();
        assert_eq!(
            serde_json::to_value(&event).unwrap()["value"],
            json!(9_007_199_254_740_993i64)
        );
    }

    #[test]
    fn event_round_trips_through_json_verbatim() {
        let payload = json!({
            "app": "a", "stage": "CODE", "type": "T", "value": 0.5,
            "eventTime": "2020-09-03T07:51:27.669Z",
            "tags": {"k": "v"},
        });
        let event = validate_event(&payload).unwrap();
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back, payload);
    }
}
