//! Archive and stream pipeline for telemetry events.
//!
//! # Modules
//!
//! - [`archive`] - Durable NDJSON archive (S3), grouped parallel writes
//!   and validated reads.
//! - [`stream`] - Chunked forwarding of archived events into the
//!   analytics stream (Kinesis).
//! - [`capacity`] - Shard-count scaling of the stream within provider
//!   limits.
//! - [`redrive`] - Resumable whole-archive re-forwarding, driven by an
//!   external looping controller.
//!
//! # Architecture
//!
//! ```text
//! ingestion ──▶ ArchiveStore ──▶ Forwarder ──▶ StreamClient
//!                    ▲               ▲
//!                    │               │ paced, fatal-on-error
//!              RedriveOrchestrator ──┘
//!                    │
//!              CapacityController (scale up, drain back down)
//! ```
//!
//! The archive is the source of truth: the stream can always be
//! rebuilt from it by a redrive, which is why forwarding is allowed to
//! be at-least-once.

pub mod archive;
pub mod capacity;
pub mod error;
pub mod redrive;
pub mod stream;

pub use archive::{
    read_events, write_events, ArchivePage, ArchiveStore, MemoryArchiveStore, S3ArchiveStore,
};
pub use capacity::{
    CapacityController, KinesisStreamControl, MemoryStreamControl, ScaleDirection, StreamControl,
    MAX_SHARDS,
};
pub use error::{Error, Result};
pub use redrive::{RedriveConfig, RedriveCursor, RedriveOrchestrator, DRAIN_SENTINEL};
pub use stream::{
    ChunkPacing, ForwardPolicy, Forwarder, KinesisStreamClient, MemoryStreamClient, PutOutcome,
    StreamClient, MAX_CALL_BYTES, MAX_RECORDS_PER_CALL,
};
