//! Durable NDJSON archive of telemetry events.
//!
//! The archive is an object store holding one NDJSON object per
//! `(app, stage, type)` group per ingestion call. [`write_events`]
//! partitions a batch and writes all groups in parallel;
//! [`read_events`] fetches an object and re-runs the ingestion-time
//! validation so corrupt data is caught before forwarding.
//!
//! [`S3ArchiveStore`] is the production backend. [`MemoryArchiveStore`]
//! backs tests across the workspace, which is why it lives here rather
//! than behind `#[cfg(test)]`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use parking_lot::Mutex;
use tally_core::{group_events, to_ndjson, validate_events, ArchiveKey, TelemetryEvent};
use tracing::info;

use crate::error::{Error, Result};

/// One page of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePage {
    /// Keys in lexicographic order.
    pub keys: Vec<String>,
    /// Marker to pass for the next page, absent on the last page.
    pub next_marker: Option<String>,
}

/// Blob storage holding the telemetry archive.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Write one object. Overwrites are allowed (keys are unique by
    /// construction, so an overwrite is always a retry).
    async fn put(&self, key: &ArchiveKey, body: String) -> Result<()>;

    /// Fetch one object body.
    async fn get(&self, key: &str) -> Result<String>;

    /// List a page of keys strictly after `marker`.
    async fn list_page(&self, marker: Option<&str>, max_keys: usize) -> Result<ArchivePage>;
}

/// Partition a batch and write each group as its own archive object.
///
/// Groups are written in parallel; the returned keys are in
/// group-formation order regardless of write completion order. Any
/// single failure fails the call, but sibling writes that already
/// completed stay in place (the pipeline is at-least-once, not
/// all-or-nothing).
pub async fn write_events(
    store: &dyn ArchiveStore,
    events: Vec<TelemetryEvent>,
) -> Result<Vec<ArchiveKey>> {
    let now = chrono::Utc::now();
    let groups = group_events(events);
    let keyed: Vec<(ArchiveKey, Vec<TelemetryEvent>)> = groups
        .into_iter()
        .map(|group| (group.key_at(now), group.events))
        .collect();
    write_groups(store, keyed).await
}

/// Write pre-keyed groups. Key generation is only overridden by tests;
/// production traffic goes through [`write_events`].
pub async fn write_groups(
    store: &dyn ArchiveStore,
    groups: Vec<(ArchiveKey, Vec<TelemetryEvent>)>,
) -> Result<Vec<ArchiveKey>> {
    let keys: Vec<ArchiveKey> = groups.iter().map(|(key, _)| key.clone()).collect();

    let writes = groups.into_iter().map(|(key, events)| async move {
        let body = to_ndjson(&events)?;
        let count = events.len();
        store.put(&key, body).await?;
        info!(key = %key, events = count, "archived event group");
        Ok::<(), Error>(())
    });
    futures::future::try_join_all(writes).await?;

    Ok(keys)
}

/// Read one archive object and validate it as the ingestion path would.
///
/// # Errors
///
/// [`Error::ArchiveRead`] if the object cannot be fetched,
/// [`Error::InvalidArchiveData`] if its contents fail parsing or
/// structural validation.
pub async fn read_events(store: &dyn ArchiveStore, key: &str) -> Result<Vec<TelemetryEvent>> {
    let body = store.get(key).await?;
    let values = tally_core::from_ndjson(&body).map_err(|source| Error::InvalidArchiveData {
        key: key.to_string(),
        source,
    })?;
    validate_events(&serde_json::Value::Array(values)).map_err(|source| {
        Error::InvalidArchiveData {
            key: key.to_string(),
            source,
        }
    })
}

/// Archive backed by an S3 bucket.
pub struct S3ArchiveStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArchiveStore {
    /// Create a store using default credentials from the environment.
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.into(),
        }
    }

    /// Create with an explicit client (custom endpoints, tests).
    pub fn with_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn put(&self, key: &ArchiveKey, body: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type("application/json")
            .body(ByteStream::from(body.into_bytes()))
            .send()
            .await
            .map_err(|e| Error::ArchiveWrite {
                key: key.as_str().to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::ArchiveRead {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::ArchiveRead {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes();

        String::from_utf8(bytes.to_vec()).map_err(|e| Error::ArchiveRead {
            key: key.to_string(),
            message: format!("object is not valid UTF-8: {e}"),
        })
    }

    async fn list_page(&self, marker: Option<&str>, max_keys: usize) -> Result<ArchivePage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(max_keys as i32)
            .set_start_after(marker.map(str::to_string))
            .send()
            .await
            .map_err(|e| Error::ArchiveList {
                message: e.to_string(),
            })?;

        let keys: Vec<String> = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        // list_objects_v2 has no NextMarker; the last key of a
        // truncated page is the marker for the next one.
        let next_marker = if response.is_truncated().unwrap_or(false) {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ArchivePage { keys, next_marker })
    }
}

/// In-memory archive used by tests throughout the workspace.
#[derive(Default)]
pub struct MemoryArchiveStore {
    objects: Mutex<BTreeMap<String, String>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// All stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Direct body access for assertions.
    pub fn body(&self, key: &str) -> Option<String> {
        self.objects.lock().get(key).cloned()
    }

    /// Seed an object without going through the writer.
    pub fn insert_raw(&self, key: impl Into<String>, body: impl Into<String>) {
        self.objects.lock().insert(key.into(), body.into());
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn put(&self, key: &ArchiveKey, body: String) -> Result<()> {
        self.objects.lock().insert(key.as_str().to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ArchiveRead {
                key: key.to_string(),
                message: "no such object".to_string(),
            })
    }

    async fn list_page(&self, marker: Option<&str>, max_keys: usize) -> Result<ArchivePage> {
        let objects = self.objects.lock();
        let keys: Vec<String> = objects
            .keys()
            .filter(|key| marker.is_none_or(|m| key.as_str() > m))
            .take(max_keys)
            .cloned()
            .collect();

        let next_marker = match keys.last() {
            Some(last) if objects.keys().any(|k| k.as_str() > last.as_str()) => {
                Some(last.clone())
            }
            _ => None,
        };

        Ok(ArchivePage { keys, next_marker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::MetricValue;

    fn batch() -> Vec<TelemetryEvent> {
        validate_events(&json!([
            {"app": "app-1", "stage": "CODE", "type": "USER_ACTION_1", "value": 1,
             "eventTime": "2020-09-03T07:51:27.669Z"},
            {"app": "app-2", "stage": "PROD", "type": "USER_ACTION_2", "value": 2,
             "eventTime": "2020-09-03T07:52:00.000Z"},
            {"app": "app-1", "stage": "CODE", "type": "USER_ACTION_1", "value": 3,
             "eventTime": "2020-09-03T07:53:00.000Z"},
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn writes_one_object_per_group_and_returns_keys_in_order() {
        let store = MemoryArchiveStore::new();
        let keys = write_events(store.as_ref(), batch()).await.unwrap();

        assert_eq!(keys.len(), 2);
        assert!(keys[0].as_str().starts_with("data/app-1/CODE/USER_ACTION_1/"));
        assert!(keys[1].as_str().starts_with("data/app-2/PROD/USER_ACTION_2/"));
        assert_eq!(store.len(), 2);

        // First group holds both app-1 events as NDJSON lines, in order.
        let body = store.body(keys[0].as_str()).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.ends_with('\n'));
        // Integer values keep their original tokens in the archive.
        assert!(body.contains("\"value\":1,"), "float rewrite in {body}");
    }

    #[tokio::test]
    async fn read_round_trips_written_events() {
        let store = MemoryArchiveStore::new();
        let original = batch();
        let keys = write_events(store.as_ref(), original.clone()).await.unwrap();

        let group_one = read_events(store.as_ref(), keys[0].as_str()).await.unwrap();
        assert_eq!(group_one.len(), 2);
        assert_eq!(group_one[0], original[0]);
        assert_eq!(group_one[1].value, MetricValue::Number(3.into()));
    }

    #[tokio::test]
    async fn read_of_missing_object_is_archive_read_error() {
        let store = MemoryArchiveStore::new();
        let err = read_events(store.as_ref(), "data/nothing").await.unwrap_err();
        assert!(matches!(err, Error::ArchiveRead { .. }));
    }

    #[tokio::test]
    async fn read_of_corrupt_object_is_invalid_archive_data() {
        let store = MemoryArchiveStore::new();
        store.insert_raw("data/bad", "{\"app\": 42}\n");
        let err = read_events(store.as_ref(), "data/bad").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArchiveData { .. }));

        store.insert_raw("data/worse", "not json at all\n");
        let err = read_events(store.as_ref(), "data/worse").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArchiveData { .. }));
    }

    #[tokio::test]
    async fn listing_pages_through_all_keys() {
        let store = MemoryArchiveStore::new();
        for n in 0..5 {
            store.insert_raw(format!("data/key-{n}"), "");
        }

        let first = store.list_page(None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["data/key-0", "data/key-1"]);
        assert_eq!(first.next_marker.as_deref(), Some("data/key-1"));

        let second = store
            .list_page(first.next_marker.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["data/key-2", "data/key-3"]);

        let last = store
            .list_page(second.next_marker.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(last.keys, vec!["data/key-4"]);
        assert!(last.next_marker.is_none());
    }

    #[tokio::test]
    async fn listing_empty_archive_is_an_empty_terminal_page() {
        let store = MemoryArchiveStore::new();
        let page = store.list_page(None, 10).await.unwrap();
        assert!(page.keys.is_empty());
        assert!(page.next_marker.is_none());
    }
}
