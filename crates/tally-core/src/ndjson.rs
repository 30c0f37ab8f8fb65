//! Newline-delimited JSON codec for archive object bodies.
//!
//! One JSON object per line, trailing newline. This is the exact
//! on-disk format of every archive object, so the encoder and decoder
//! must stay inverses of each other.

use crate::error::Result;
use crate::event::TelemetryEvent;

/// Serialize events as NDJSON: one object per line, trailing newline.
pub fn to_ndjson(events: &[TelemetryEvent]) -> Result<String> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse an NDJSON body into raw JSON values, one per non-blank line.
///
/// Parsing stops at the first malformed line; callers run structural
/// validation on the result separately so the error detail is uniform
/// with the ingestion path.
pub fn from_ndjson(body: &str) -> Result<Vec<serde_json::Value>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::validate_events;
    use serde_json::json;

    fn events() -> Vec<TelemetryEvent> {
        validate_events(&json!([
            {"app": "a", "stage": "CODE", "type": "T1", "value": 1,
             "eventTime": "2020-09-03T07:51:27.669Z"},
            {"app": "b", "stage": "PROD", "type": "T2", "value": true,
             "eventTime": "2020-09-04T08:00:00.000Z", "tags": {"k": "v"}},
        ]))
        .unwrap()
    }

    #[test]
    fn encodes_one_object_per_line_with_trailing_newline() {
        let body = to_ndjson(&events()).unwrap();
        assert!(body.ends_with('\n'));
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn round_trip_is_identity() {
        let original = events();
        let body = to_ndjson(&original).unwrap();
        let values = from_ndjson(&body).unwrap();
        let decoded = validate_events(&serde_json::Value::Array(values)).unwrap();
        assert_eq!(decoded, original);

        // And the serialized form itself is stable.
        let again = to_ndjson(&decoded).unwrap();
        assert_eq!(again, body);
    }

    #[test]
    fn ignores_blank_lines() {
        let values = from_ndjson("\n{\"a\":1}\n\n{\"b\":2}\n").unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn empty_body_decodes_to_no_events() {
        assert!(from_ndjson("").unwrap().is_empty());
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(from_ndjson("{\"a\":1}\nnot json\n").is_err());
    }
}
