//! Chunked forwarding of events into the analytics stream.
//!
//! Stream writes have two hard ceilings per call: 500 records and
//! 5 MiB of serialized data. [`build_chunks`] packs records with a
//! single greedy pass - the limits are ceilings to respect, not an
//! optimization target, so there is no repacking.
//!
//! Forwarding has two failure policies. The post-archive trigger uses
//! [`ForwardPolicy::BestEffort`]: rejected records are logged and the
//! rest keep flowing. The redrive path uses [`ForwardPolicy::Fatal`]:
//! a rejected record aborts the remaining chunks so the redrive cursor
//! never advances past unconfirmed data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::PutRecordsRequestEntry;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::{read_events, ArchiveStore};
use crate::error::{Error, Result};

/// Provider limit: records per stream-write call.
pub const MAX_RECORDS_PER_CALL: usize = 500;

/// Provider limit: serialized bytes per stream-write call.
pub const MAX_CALL_BYTES: usize = 5 * 1024 * 1024;

/// Outcome of one stream-write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Records the stream rejected out of this call.
    pub failed: usize,
}

/// A capacity-limited record stream.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Write one chunk of records in a single call. The call itself
    /// succeeding does not mean every record landed; per-record
    /// rejections come back in the outcome.
    async fn put_records(&self, records: Vec<Vec<u8>>) -> Result<PutOutcome>;
}

/// How to react to per-record stream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Log rejections and keep going. Duplicate-tolerant consumers
    /// plus the redrive path make occasional loss here recoverable.
    BestEffort,
    /// Abort remaining chunks on any rejection. Used by redrive, where
    /// silent data loss is unacceptable.
    Fatal,
}

/// Throttle between chunk writes.
///
/// Each open shard absorbs roughly one chunk per second, so the pacing
/// budget is the shard count: after each write, sleep out the rest of
/// its `1000ms / chunks_per_second` window.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPacing {
    pub chunks_per_second: u64,
}

impl ChunkPacing {
    fn window(&self) -> Duration {
        Duration::from_millis(1000 / self.chunks_per_second.max(1))
    }
}

/// Pack records into chunks respecting both per-call ceilings.
///
/// Greedy single pass: a record joins the current chunk while the
/// count stays under [`MAX_RECORDS_PER_CALL`] and the combined size
/// stays under [`MAX_CALL_BYTES`]; otherwise the chunk closes and a
/// new one starts. A record larger than the size ceiling still gets a
/// chunk to itself - the provider will reject it, which surfaces
/// through the normal failure policy rather than silently dropping it.
pub fn build_chunks(records: Vec<Vec<u8>>) -> Vec<Vec<Vec<u8>>> {
    let mut chunks: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut current_bytes = 0usize;

    for record in records {
        let fits = current.len() < MAX_RECORDS_PER_CALL
            && current_bytes + record.len() < MAX_CALL_BYTES;
        if !fits && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += record.len();
        current.push(record);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Moves archived events onto the stream.
pub struct Forwarder {
    archive: Arc<dyn ArchiveStore>,
    stream: Arc<dyn StreamClient>,
}

impl Forwarder {
    pub fn new(archive: Arc<dyn ArchiveStore>, stream: Arc<dyn StreamClient>) -> Self {
        Self { archive, stream }
    }

    /// Forward one archive object: fetch, re-validate, transform each
    /// event to its stream record, chunk and write.
    ///
    /// Returns the number of events forwarded.
    pub async fn forward_object(&self, key: &str, policy: ForwardPolicy) -> Result<usize> {
        let events = read_events(self.archive.as_ref(), key).await?;
        let records: Vec<serde_json::Value> = events
            .iter()
            .map(|event| event.to_stream_record(None))
            .collect();
        let count = self.forward_records(records, policy, None).await?;
        info!(key = %key, events = count, "forwarded archive object to stream");
        Ok(count)
    }

    /// Forward pre-built stream records, optionally pacing chunk
    /// writes against a shard budget.
    ///
    /// Returns the number of records attempted.
    pub async fn forward_records(
        &self,
        records: Vec<serde_json::Value>,
        policy: ForwardPolicy,
        pacing: Option<ChunkPacing>,
    ) -> Result<usize> {
        let encoded: Vec<Vec<u8>> = records
            .iter()
            .map(|record| Ok(serde_json::to_vec(record).map_err(tally_core::Error::from)?))
            .collect::<Result<_>>()?;
        let total = encoded.len();
        let chunks = build_chunks(encoded);
        let chunk_count = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let started = Instant::now();
            let size = chunk.len();
            let outcome = self.stream.put_records(chunk).await?;

            if outcome.failed > 0 {
                match policy {
                    ForwardPolicy::BestEffort => warn!(
                        chunk = index + 1,
                        chunks = chunk_count,
                        failed = outcome.failed,
                        records = size,
                        "stream rejected records; continuing (best effort)"
                    ),
                    ForwardPolicy::Fatal => {
                        return Err(Error::StreamWrite {
                            failed: outcome.failed,
                            message: format!(
                                "chunk {}/{} had rejected records",
                                index + 1,
                                chunk_count
                            ),
                        });
                    }
                }
            }

            if let Some(pacing) = pacing {
                let window = pacing.window();
                let elapsed = started.elapsed();
                if elapsed < window && index + 1 < chunk_count {
                    tokio::time::sleep(window - elapsed).await;
                }
            }
        }

        Ok(total)
    }
}

/// Stream client backed by Kinesis `PutRecords`.
pub struct KinesisStreamClient {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
}

impl KinesisStreamClient {
    /// Create a client using default credentials from the environment.
    pub async fn new(stream_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_kinesis::Client::new(&config),
            stream_name: stream_name.into(),
        }
    }

    /// Create with an explicit client (custom endpoints, tests).
    pub fn with_client(client: aws_sdk_kinesis::Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl StreamClient for KinesisStreamClient {
    async fn put_records(&self, records: Vec<Vec<u8>>) -> Result<PutOutcome> {
        // A random partition key per record spreads load evenly across
        // shards; per-event ordering is not a pipeline guarantee.
        let entries: Vec<PutRecordsRequestEntry> = records
            .into_iter()
            .map(|record| {
                PutRecordsRequestEntry::builder()
                    .data(Blob::new(record))
                    .partition_key(Uuid::new_v4().to_string())
                    .build()
                    .map_err(|e| Error::StreamWrite {
                        failed: 0,
                        message: e.to_string(),
                    })
            })
            .collect::<Result<_>>()?;

        let response = self
            .client
            .put_records()
            .stream_name(&self.stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|e| Error::StreamWrite {
                failed: 0,
                message: e.to_string(),
            })?;

        Ok(PutOutcome {
            failed: response.failed_record_count().unwrap_or(0).max(0) as usize,
        })
    }
}

/// In-memory stream used by tests throughout the workspace.
#[derive(Default)]
pub struct MemoryStreamClient {
    calls: Mutex<Vec<Vec<Vec<u8>>>>,
    /// Failure counts to report, one per upcoming call.
    planned_failures: Mutex<Vec<usize>>,
}

impl MemoryStreamClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next calls report this many rejected records each.
    pub fn fail_next_calls(&self, failures: Vec<usize>) {
        *self.planned_failures.lock() = failures;
    }

    /// Every chunk written so far.
    pub fn calls(&self) -> Vec<Vec<Vec<u8>>> {
        self.calls.lock().clone()
    }

    /// All records across all calls, decoded as JSON.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.calls
            .lock()
            .iter()
            .flatten()
            .map(|bytes| serde_json::from_slice(bytes).expect("stream records are JSON"))
            .collect()
    }
}

#[async_trait]
impl StreamClient for MemoryStreamClient {
    async fn put_records(&self, records: Vec<Vec<u8>>) -> Result<PutOutcome> {
        self.calls.lock().push(records);
        let failed = {
            let mut planned = self.planned_failures.lock();
            if planned.is_empty() {
                0
            } else {
                planned.remove(0)
            }
        };
        Ok(PutOutcome { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_events, MemoryArchiveStore};
    use serde_json::json;
    use tally_core::validate_events;

    fn record_of(size: usize) -> Vec<u8> {
        vec![b'x'; size]
    }

    #[test]
    fn small_batch_is_one_chunk() {
        let chunks = build_chunks(vec![record_of(10), record_of(20)]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
    }

    #[test]
    fn count_ceiling_splits_chunks() {
        let records: Vec<Vec<u8>> = (0..1101).map(|_| record_of(8)).collect();
        let chunks = build_chunks(records);
        // ceil(1101 / 500) calls.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_RECORDS_PER_CALL);
        assert_eq!(chunks[1].len(), MAX_RECORDS_PER_CALL);
        assert_eq!(chunks[2].len(), 101);
    }

    #[test]
    fn size_ceiling_splits_chunks() {
        // Three 2 MiB records: the third would push past 5 MiB.
        let records: Vec<Vec<u8>> = (0..3).map(|_| record_of(2 * 1024 * 1024)).collect();
        let chunks = build_chunks(records);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
        for chunk in &chunks {
            let bytes: usize = chunk.iter().map(Vec::len).sum();
            assert!(bytes < MAX_CALL_BYTES);
            assert!(chunk.len() <= MAX_RECORDS_PER_CALL);
        }
    }

    #[test]
    fn oversized_record_still_gets_its_own_chunk() {
        let records = vec![record_of(10), record_of(MAX_CALL_BYTES + 1), record_of(10)];
        let chunks = build_chunks(records);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn no_records_no_chunks() {
        assert!(build_chunks(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn forward_object_transforms_and_writes_each_event() {
        let archive = MemoryArchiveStore::new();
        let stream = MemoryStreamClient::new();
        let events = validate_events(&json!([
            {"app": "a", "stage": "CODE", "type": "T", "value": 1,
             "eventTime": "2020-09-03T07:51:27.669Z", "tags": {"path": "/x"}},
            {"app": "a", "stage": "CODE", "type": "T", "value": 2,
             "eventTime": "2020-09-03T07:52:00.000Z"},
        ]))
        .unwrap();
        let keys = write_events(archive.as_ref(), events).await.unwrap();

        let forwarder = Forwarder::new(archive.clone(), stream.clone());
        let count = forwarder
            .forward_object(keys[0].as_str(), ForwardPolicy::BestEffort)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let records = stream.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["@timestamp"], "2020-09-03T07:51:27.669Z");
        assert_eq!(records[0]["_tags"]["path"], "/x");
        assert!(records[0].get("tags").is_none());
    }

    #[tokio::test]
    async fn forward_object_refuses_corrupt_archive_data() {
        let archive = MemoryArchiveStore::new();
        archive.insert_raw("data/bad", "{\"value\": \"nope\"}\n");
        let stream = MemoryStreamClient::new();
        let forwarder = Forwarder::new(archive, stream.clone());

        let err = forwarder
            .forward_object("data/bad", ForwardPolicy::BestEffort)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArchiveData { .. }));
        assert!(stream.calls().is_empty(), "nothing may reach the stream");
    }

    #[tokio::test]
    async fn best_effort_tolerates_rejected_records() {
        let archive = MemoryArchiveStore::new();
        let stream = MemoryStreamClient::new();
        stream.fail_next_calls(vec![1]);
        let forwarder = Forwarder::new(archive, stream.clone());

        let records = vec![json!({"n": 1}), json!({"n": 2})];
        let count = forwarder
            .forward_records(records, ForwardPolicy::BestEffort, None)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn fatal_policy_aborts_remaining_chunks() {
        let archive = MemoryArchiveStore::new();
        let stream = MemoryStreamClient::new();
        stream.fail_next_calls(vec![2]);
        let forwarder = Forwarder::new(archive, stream.clone());

        // Two chunks' worth of records; the first call reports failures.
        let records: Vec<serde_json::Value> =
            (0..501).map(|n| json!({"n": n})).collect();
        let err = forwarder
            .forward_records(records, ForwardPolicy::Fatal, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StreamWrite { failed: 2, .. }));
        assert_eq!(stream.calls().len(), 1, "second chunk must not be written");
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_sleeps_out_the_chunk_window() {
        let archive = MemoryArchiveStore::new();
        let stream = MemoryStreamClient::new();
        let forwarder = Forwarder::new(archive, stream.clone());

        let records: Vec<serde_json::Value> =
            (0..1000).map(|n| json!({"n": n})).collect();
        let started = Instant::now();
        forwarder
            .forward_records(
                records,
                ForwardPolicy::Fatal,
                Some(ChunkPacing { chunks_per_second: 2 }),
            )
            .await
            .unwrap();

        // Two chunks, one 500ms window slept between them.
        assert_eq!(stream.calls().len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
