//! Error types for the core telemetry model.

use thiserror::Error;

use crate::event::ValidationFailure;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating or encoding events.
#[derive(Error, Debug)]
pub enum Error {
    /// The payload failed structural validation.
    ///
    /// Carries every failure found, not just the first, so callers can
    /// surface the full detail in a 400 response body.
    #[error("invalid event payload: {}", summarise(.0))]
    InvalidPayload(Vec<ValidationFailure>),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The validation failures behind an [`Error::InvalidPayload`], if any.
    pub fn validation_failures(&self) -> Option<&[ValidationFailure]> {
        match self {
            Error::InvalidPayload(failures) => Some(failures),
            _ => None,
        }
    }
}

fn summarise(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_payload_display_lists_every_failure() {
        let err = Error::InvalidPayload(vec![
            ValidationFailure::new("[0].app", "must be a non-empty string"),
            ValidationFailure::new("[1].eventTime", "not a valid ISO-8601 timestamp"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("[0].app"));
        assert!(msg.contains("[1].eventTime"));
        assert!(msg.contains("non-empty string"));
    }

    #[test]
    fn validation_failures_accessor() {
        let err = Error::InvalidPayload(vec![ValidationFailure::new("[0].value", "missing")]);
        assert_eq!(err.validation_failures().unwrap().len(), 1);

        let err: Error = serde_json::from_str::<serde_json::Value>("nope").unwrap_err().into();
        assert!(err.validation_failures().is_none());
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }
}
