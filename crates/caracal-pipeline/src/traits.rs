use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use caracal_types::AuthorityEvent;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline-layer errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Downstream lag exhausted the producer's bounded blocking. The
    /// gateway treats this as a deny (fail-closed).
    #[error("pipeline backpressure: partition {partition} full after {waited_ms}ms")]
    Backpressure { partition: u32, waited_ms: u64 },

    #[error("unknown partition {0}")]
    UnknownPartition(u32),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("pipeline closed")]
    Closed,
}

/// One delivered entry. Offsets are per-partition and contiguous.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Decode the canonical payload back into an event.
    pub fn decode(&self) -> Result<AuthorityEvent, PipelineError> {
        serde_json::from_slice(&self.payload).map_err(|e| PipelineError::Serialization(e.to_string()))
    }
}

/// A quarantined payload.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    /// Failure kind the entry is keyed by (e.g. `deserialization`).
    pub kind: String,
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
    pub quarantined_at: DateTime<Utc>,
}

/// Producer side: the gateway publishes exactly one event per decision.
#[async_trait]
pub trait PipelineProducer: Send + Sync {
    /// Publish an event to its principal's partition, blocking up to
    /// `timeout` under backpressure. Once this returns `Ok` the event is
    /// recorded and will be delivered at least once; caller cancellation
    /// after that point changes nothing.
    async fn publish(&self, event: &AuthorityEvent, timeout: Duration) -> PipelineResult<()>;

    fn partition_count(&self) -> u32;
}

/// Consumer side: one ledger writer per partition.
#[async_trait]
pub trait PipelineConsumer: Send + Sync {
    /// Deliver up to `max` entries past the committed offset, waiting up
    /// to `wait` for data. Uncommitted entries are redelivered on the
    /// next poll (at-least-once).
    async fn poll(&self, partition: u32, max: usize, wait: Duration)
        -> PipelineResult<Vec<Delivery>>;

    /// Commit offsets up to and including `offset`. Called only after
    /// downstream persistence succeeds.
    async fn commit(&self, partition: u32, offset: u64) -> PipelineResult<()>;

    /// Quarantine a permanently undecodable entry and move on.
    async fn quarantine(
        &self,
        partition: u32,
        offset: u64,
        kind: &str,
        payload: Vec<u8>,
    ) -> PipelineResult<()>;

    /// Inspect the dead-letter partition.
    async fn dead_letters(&self) -> PipelineResult<Vec<DeadLetter>>;
}
