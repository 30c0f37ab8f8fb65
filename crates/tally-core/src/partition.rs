//! Partitioning of event batches into archive objects.
//!
//! One ingestion call may carry events for several applications. Each
//! distinct `(app, stage, type)` combination becomes its own archive
//! object so downstream consumers can subscribe to a prefix. Keys look
//! like:
//!
//! ```text
//! data/{app}/{stage}/{type}/{YYYY-MM-DD}/{ISO8601}-{uuid}
//! ```
//!
//! The date segment partitions by day; the ISO timestamp in the file
//! name aids discovery, and the uuid guarantees uniqueness.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::event::TelemetryEvent;

/// Sentinel substituted for a missing or empty partition attribute.
///
/// Partitioning must never fail: an event with a blank `app` still
/// gets archived, just under an `UNDEFINED` prefix.
pub const UNDEFINED_ATTRIBUTE: &str = "UNDEFINED";

/// A fully-formed archive object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey(String);

impl ArchiveKey {
    /// Build a key for a partition at a point in time.
    ///
    /// Empty attribute segments are replaced with
    /// [`UNDEFINED_ATTRIBUTE`].
    pub fn build(app: &str, stage: &str, event_type: &str, now: DateTime<Utc>) -> Self {
        let iso = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let day = now.format("%Y-%m-%d");
        ArchiveKey(format!(
            "data/{}/{}/{}/{}/{}-{}",
            segment(app),
            segment(stage),
            segment(event_type),
            day,
            iso,
            Uuid::new_v4(),
        ))
    }

    /// Wrap an explicit key. Test-only override of key generation.
    pub fn from_raw(key: impl Into<String>) -> Self {
        ArchiveKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn segment(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNDEFINED_ATTRIBUTE
    } else {
        trimmed
    }
}

/// Events sharing one `(app, stage, type)` partition, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroup {
    pub app: String,
    pub stage: String,
    pub event_type: String,
    pub events: Vec<TelemetryEvent>,
}

impl EventGroup {
    /// The archive key for this group at `now`.
    pub fn key_at(&self, now: DateTime<Utc>) -> ArchiveKey {
        ArchiveKey::build(&self.app, &self.stage, &self.event_type, now)
    }
}

/// Group an ordered batch by `(app, stage, type)`.
///
/// Within-group order is preserved, and groups come out in the order
/// their first event appeared, so a batch's archive keys line up with
/// the shape of the original request.
pub fn group_events(events: Vec<TelemetryEvent>) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = Vec::new();
    for event in events {
        let found = groups.iter_mut().find(|g| {
            g.app == event.app && g.stage == event.stage && g.event_type == event.event_type
        });
        match found {
            Some(group) => group.events.push(event),
            None => groups.push(EventGroup {
                app: event.app.clone(),
                stage: event.stage.clone(),
                event_type: event.event_type.clone(),
                events: vec![event],
            }),
        }
    }
    groups
}
