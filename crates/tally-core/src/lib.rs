//! Core types for the usage-telemetry pipeline.
//!
//! This crate holds everything the service crates share and nothing
//! that does I/O:
//!
//! - [`event`] - The [`TelemetryEvent`] wire type, structural
//!   validation, and the stream-record transform applied on the way to
//!   the analytics stream.
//! - [`ndjson`] - The newline-delimited JSON codec used for archive
//!   object bodies.
//! - [`partition`] - Grouping of event batches into archive objects and
//!   archive key construction.
//!
//! The same validation runs at ingestion time and again when archived
//! objects are re-read for forwarding, so a corrupt archive object is
//! detected before anything reaches the stream.

pub mod error;
pub mod event;
pub mod ndjson;
pub mod partition;

pub use error::{Error, Result};
pub use event::{
    validate_event, validate_events, MetricValue, TagValue, TelemetryEvent, ValidationFailure,
};
pub use ndjson::{from_ndjson, to_ndjson};
pub use partition::{group_events, ArchiveKey, EventGroup, UNDEFINED_ATTRIBUTE};
