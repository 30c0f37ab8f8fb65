//! Shard-count scaling of the analytics stream.
//!
//! Redrive pushes far more traffic than steady-state ingestion, so the
//! orchestrator doubles the stream's shard count on the way in and
//! halves it back down to one afterwards. Scaling a stream takes
//! minutes and the provider rejects overlapping updates, so every rule
//! here is written to be safely repeatable:
//!
//! - a stream already mid-update is left alone;
//! - `Down` reports the *target* count (undershooting throughput only
//!   risks throttling, never loss);
//! - `Up` reports the *pre-scale* count (new capacity is not effective
//!   yet, and overshooting the per-shard rate would throttle writes).

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_kinesis::types::{ScalingType, StreamStatus};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Provider ceiling on shards reachable by same-day scale-up-then-down.
pub const MAX_SHARDS: u64 = 32;

/// Which way to scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

/// Low-level control surface of the stream.
#[async_trait]
pub trait StreamControl: Send + Sync {
    /// Count only currently-open shards. A stream's shard history
    /// accumulates closed shards over time and would overcount.
    async fn open_shard_count(&self) -> Result<u64>;

    /// Whether a shard-count update is already in flight.
    async fn is_updating(&self) -> Result<bool>;

    /// Ask the provider for a new shard count. Returns once the
    /// request is accepted, long before it takes effect.
    async fn request_shard_count(&self, target: u64) -> Result<()>;
}

/// Applies the scaling rules on top of a [`StreamControl`].
pub struct CapacityController {
    control: Arc<dyn StreamControl>,
}

impl CapacityController {
    pub fn new(control: Arc<dyn StreamControl>) -> Self {
        Self { control }
    }

    /// Scale the stream and report the shard count callers should pace
    /// against. Idempotent: calling again mid-transition is a no-op.
    pub async fn scale(&self, direction: ScaleDirection) -> Result<u64> {
        let current = self.control.open_shard_count().await?;

        if self.control.is_updating().await? {
            info!(shards = current, "stream is mid-update; leaving shard count alone");
            return Ok(current);
        }

        let (target, reported) = match direction {
            ScaleDirection::Down if current <= 1 => return Ok(current.max(1)),
            ScaleDirection::Down => {
                let target = current.div_ceil(2);
                (target, target)
            }
            ScaleDirection::Up if current >= MAX_SHARDS => return Ok(current),
            ScaleDirection::Up => ((current * 2).min(MAX_SHARDS), current),
        };

        match self.control.request_shard_count(target).await {
            Ok(()) => {
                info!(from = current, to = target, "requested stream shard count change");
                Ok(reported)
            }
            // A rejected scaling request is never fatal; keep pacing
            // against the count we know is real.
            Err(Error::CapacityControl { message }) => {
                warn!(from = current, to = target, %message, "shard scaling request rejected");
                Ok(current)
            }
            Err(other) => Err(other),
        }
    }
}

/// Kinesis-backed stream control.
pub struct KinesisStreamControl {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
}

impl KinesisStreamControl {
    /// Create using default credentials from the environment.
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
impl StreamControl for KinesisStreamControl {
    async fn open_shard_count(&self) -> Result<u64> {
        let mut open = 0u64;
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.list_shards();
            request = match &next_token {
                Some(token) => request.next_token(token),
                None => request.stream_name(&self.stream_name),
            };
            let response = request.send().await.map_err(|e| Error::CapacityControl {
                message: e.to_string(),
            })?;

            open += response
                .shards()
                .iter()
                .filter(|shard| {
                    shard
                        .sequence_number_range()
                        .map(|range| range.ending_sequence_number().is_none())
                        .unwrap_or(false)
                })
                .count() as u64;

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(open)
    }

    async fn is_updating(&self) -> Result<bool> {
        let response = self
            .client
            .describe_stream_summary()
            .stream_name(&self.stream_name)
            .send()
            .await
            .map_err(|e| Error::CapacityControl {
                message: e.to_string(),
            })?;

        Ok(response
            .stream_description_summary()
            .map(|summary| *summary.stream_status() == StreamStatus::Updating)
            .unwrap_or(false))
    }

    async fn request_shard_count(&self, target: u64) -> Result<()> {
        self.client
            .update_shard_count()
            .stream_name(&self.stream_name)
            .target_shard_count(target as i32)
            .scaling_type(ScalingType::UniformScaling)
            .send()
            .await
            .map_err(|e| Error::CapacityControl {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory stream control used by tests throughout the workspace.
pub struct MemoryStreamControl {
    state: Mutex<ControlState>,
}

struct ControlState {
    shards: u64,
    updating: bool,
    reject_requests: bool,
    requested: Vec<u64>,
}

impl MemoryStreamControl {
    pub fn new(shards: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ControlState {
                shards,
                updating: false,
                reject_requests: false,
                requested: Vec::new(),
            }),
        })
    }

    pub fn set_updating(&self, updating: bool) {
        self.state.lock().updating = updating;
    }

    pub fn set_reject_requests(&self, reject: bool) {
        self.state.lock().reject_requests = reject;
    }

    /// Every accepted target, in order.
    pub fn requested(&self) -> Vec<u64> {
        self.state.lock().requested.clone()
    }
}

#[async_trait]
impl StreamControl for MemoryStreamControl {
    async fn open_shard_count(&self) -> Result<u64> {
        Ok(self.state.lock().shards)
    }

    async fn is_updating(&self) -> Result<bool> {
        Ok(self.state.lock().updating)
    }

    async fn request_shard_count(&self, target: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.reject_requests {
            return Err(Error::CapacityControl {
                message: "resource in use".to_string(),
            });
        }
        // Takes effect immediately; real streams converge over minutes.
        state.shards = target;
        state.requested.push(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn up_doubles_but_reports_prescale_count() {
        let control = MemoryStreamControl::new(4);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Up).await.unwrap();
        assert_eq!(reported, 4);
        assert_eq!(control.requested(), vec![8]);
    }

    #[tokio::test]
    async fn up_at_ceiling_is_a_noop() {
        let control = MemoryStreamControl::new(32);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Up).await.unwrap();
        assert_eq!(reported, 32);
        assert!(control.requested().is_empty());
    }

    #[tokio::test]
    async fn up_clamps_target_to_ceiling() {
        let control = MemoryStreamControl::new(20);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Up).await.unwrap();
        assert_eq!(reported, 20);
        assert_eq!(control.requested(), vec![32]);
    }

    #[tokio::test]
    async fn down_halves_and_reports_target() {
        let control = MemoryStreamControl::new(8);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Down).await.unwrap();
        assert_eq!(reported, 4);
        assert_eq!(control.requested(), vec![4]);
    }

    #[tokio::test]
    async fn down_rounds_odd_counts_up() {
        let control = MemoryStreamControl::new(5);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Down).await.unwrap();
        assert_eq!(reported, 3);
    }

    #[tokio::test]
    async fn down_at_one_shard_is_a_noop() {
        let control = MemoryStreamControl::new(1);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Down).await.unwrap();
        assert_eq!(reported, 1);
        assert!(control.requested().is_empty());
    }

    #[tokio::test]
    async fn mid_update_is_a_noop_either_direction() {
        let control = MemoryStreamControl::new(8);
        control.set_updating(true);
        let controller = CapacityController::new(control.clone());

        assert_eq!(controller.scale(ScaleDirection::Up).await.unwrap(), 8);
        assert_eq!(controller.scale(ScaleDirection::Down).await.unwrap(), 8);
        assert!(control.requested().is_empty());
    }

    #[tokio::test]
    async fn rejected_request_is_not_fatal() {
        let control = MemoryStreamControl::new(8);
        control.set_reject_requests(true);
        let controller = CapacityController::new(control.clone());

        let reported = controller.scale(ScaleDirection::Down).await.unwrap();
        assert_eq!(reported, 8, "falls back to the known-real count");
    }
}
