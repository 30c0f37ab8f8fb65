//! Whole-archive redrive into the analytics stream.
//!
//! A redrive re-forwards every archived event, for backfill or
//! recovery after a stream outage. The archive is far too large to
//! walk inside one invocation's wall-clock cap, so the orchestrator is
//! a resumable state machine: the only state between invocations is an
//! opaque cursor owned by an external looping controller, which keeps
//! re-invoking with the last returned cursor until a terminal value
//! comes back.
//!
//! ```text
//! Start ──▶ Enumerating ──(pages left, out of budget)──▶ marker out
//!              │  ▲                marker in ──────────────┘
//!              │  └── next page in-process while budget allows
//!              ▼
//!          Draining ──(shards > 1, out of budget)──▶ sentinel out
//!              │
//!              ▼ shards == 1
//!            Done (null)
//! ```
//!
//! Budgets are soft self-imposed ceilings, not hard cancellation: when
//! one is exceeded the invocation simply returns its continuation
//! cursor instead of being forcibly killed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use crate::archive::{read_events, ArchiveStore};
use crate::capacity::{CapacityController, ScaleDirection};
use crate::error::Result;
use crate::stream::{ChunkPacing, ForwardPolicy, Forwarder, StreamClient};

/// Wire sentinel meaning "enumeration finished, keep scaling down".
pub const DRAIN_SENTINEL: &str = "SCALING_DOWN_STREAM";

/// Where a redrive invocation picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedriveCursor {
    /// No cursor: begin at the first archive page.
    Start,
    /// Resume enumerating after this archive key.
    Page(String),
    /// Enumeration finished; the stream is still scaling down.
    Draining,
    /// Scale-down complete. Terminal: the controller stops looping.
    Done,
}

impl RedriveCursor {
    /// Decode the controller's `Payload` value.
    pub fn from_payload(payload: Option<&str>) -> Self {
        match payload {
            None => RedriveCursor::Start,
            Some(s) if s.is_empty() => RedriveCursor::Start,
            Some(DRAIN_SENTINEL) => RedriveCursor::Draining,
            Some(marker) => RedriveCursor::Page(marker.to_string()),
        }
    }

    /// Encode back into a `Payload` value; `None` is the terminal
    /// marker the controller stops on.
    pub fn to_payload(&self) -> Option<String> {
        match self {
            RedriveCursor::Start => Some(String::new()),
            RedriveCursor::Page(marker) => Some(marker.clone()),
            RedriveCursor::Draining => Some(DRAIN_SENTINEL.to_string()),
            RedriveCursor::Done => None,
        }
    }
}

/// Tunable budgets for one invocation.
///
/// Defaults assume a 15-minute execution cap: stop starting new pages
/// with 5 minutes of headroom, and give draining a little longer since
/// each of its rounds is one cheap call plus a sleep.
#[derive(Debug, Clone)]
pub struct RedriveConfig {
    /// Keys per archive listing page. Kept well under the provider's
    /// listing maximum so one page of objects can always be forwarded
    /// within the budget, even when event files are large.
    pub page_size: usize,
    /// Start another page in-process only while elapsed time is under
    /// this.
    pub page_budget: Duration,
    /// Keep retrying scale-down only while elapsed time is under this.
    pub drain_budget: Duration,
    /// Pause between scale-down attempts.
    pub drain_interval: Duration,
}

impl Default for RedriveConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            page_budget: Duration::from_secs(10 * 60),
            drain_budget: Duration::from_secs(13 * 60),
            drain_interval: Duration::from_secs(60),
        }
    }
}

/// Runs one redrive invocation.
pub struct RedriveOrchestrator {
    archive: Arc<dyn ArchiveStore>,
    forwarder: Forwarder,
    capacity: CapacityController,
    config: RedriveConfig,
}

impl RedriveOrchestrator {
    pub fn new(
        archive: Arc<dyn ArchiveStore>,
        stream: Arc<dyn StreamClient>,
        capacity: CapacityController,
        config: RedriveConfig,
    ) -> Self {
        let forwarder = Forwarder::new(archive.clone(), stream);
        Self {
            archive,
            forwarder,
            capacity,
            config,
        }
    }

    /// Run one invocation from `cursor`, returning the cursor for the
    /// next one. The caller loops until [`RedriveCursor::Done`].
    pub async fn run(&self, cursor: RedriveCursor) -> Result<RedriveCursor> {
        let started = Instant::now();
        match cursor {
            RedriveCursor::Start => self.enumerate(None, started).await,
            RedriveCursor::Page(marker) => self.enumerate(Some(marker), started).await,
            RedriveCursor::Draining => self.drain(started).await,
            RedriveCursor::Done => Ok(RedriveCursor::Done),
        }
    }

    async fn enumerate(
        &self,
        mut marker: Option<String>,
        started: Instant,
    ) -> Result<RedriveCursor> {
        loop {
            let page = self
                .archive
                .list_page(marker.as_deref(), self.config.page_size)
                .await?;

            if page.keys.is_empty() {
                // Deliberately Draining rather than Done: scale-down
                // must always run, and at 1 shard it completes on the
                // next invocation without further work.
                info!("no archive objects to process; draining stream capacity");
                return Ok(RedriveCursor::Draining);
            }
            info!(
                files = page.keys.len(),
                after = marker.as_deref().unwrap_or("<start>"),
                "processing page of archive objects"
            );

            // Read the whole page in parallel. A corrupt or missing
            // object is logged and skipped; losing one object must not
            // stall the redrive of everything else.
            let reads = page.keys.iter().map(|key| async move {
                match read_events(self.archive.as_ref(), key).await {
                    Ok(events) => Some((key.clone(), events)),
                    Err(err) => {
                        error!(key = %key, error = %err, "skipping unreadable archive object");
                        None
                    }
                }
            });
            let page_events: Vec<(String, Vec<tally_core::TelemetryEvent>)> =
                futures::future::join_all(reads)
                    .await
                    .into_iter()
                    .flatten()
                    .collect();

            // A stable per-line id lets downstream indexing overwrite
            // re-driven duplicates instead of double counting them.
            let records: Vec<serde_json::Value> = page_events
                .iter()
                .flat_map(|(key, events)| {
                    events.iter().enumerate().map(move |(line, event)| {
                        event.to_stream_record(Some(&format!("{key}#{line}")))
                    })
                })
                .collect();

            let shards = self.capacity.scale(ScaleDirection::Up).await?;
            let forwarded = self
                .forwarder
                .forward_records(
                    records,
                    ForwardPolicy::Fatal,
                    Some(ChunkPacing {
                        chunks_per_second: shards,
                    }),
                )
                .await?;
            info!(events = forwarded, shards, "forwarded page to stream");

            match page.next_marker {
                None => {
                    info!("no more archive objects; draining stream capacity");
                    return Ok(RedriveCursor::Draining);
                }
                Some(next) => {
                    if started.elapsed() >= self.config.page_budget {
                        // Too close to the execution cap; hand the
                        // marker back and let the controller re-invoke.
                        return Ok(RedriveCursor::Page(next));
                    }
                    marker = Some(next);
                }
            }
        }
    }

    async fn drain(&self, started: Instant) -> Result<RedriveCursor> {
        loop {
            let shards = self.capacity.scale(ScaleDirection::Down).await?;
            if shards <= 1 {
                info!("stream scaled back down to 1 shard; redrive complete");
                return Ok(RedriveCursor::Done);
            }
            if started.elapsed() >= self.config.drain_budget {
                return Ok(RedriveCursor::Draining);
            }
            tokio::time::sleep(self.config.drain_interval).await;
        }
    }
}
