//! In-process reference pipeline.
//!
//! Bounded per-partition logs with offset-based consumption. Entries are
//! retained until committed, so an uncommitted batch is redelivered after
//! a consumer restart — the at-least-once half of the exactly-once
//! contract. Durability across process restarts belongs to a real broker
//! behind the same traits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};

use caracal_types::AuthorityEvent;

use crate::traits::{
    DeadLetter, Delivery, PipelineConsumer, PipelineError, PipelineProducer, PipelineResult,
};
use crate::partition_for;

/// Pipeline sizing.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub partitions: u32,
    /// Maximum uncommitted entries per partition before producers block.
    pub capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            capacity: 1024,
        }
    }
}

struct PartitionState {
    /// Uncommitted tail of the log, oldest first.
    entries: VecDeque<(u64, Arc<Vec<u8>>)>,
    next_offset: u64,
    committed: u64,
}

struct Partition {
    state: Mutex<PartitionState>,
    /// Signalled when data arrives.
    data: Notify,
    /// Signalled when commits free capacity.
    space: Notify,
}

/// In-memory pipeline implementing both ends.
pub struct InMemoryPipeline {
    config: PipelineConfig,
    partitions: Vec<Partition>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let partitions = (0..config.partitions.max(1))
            .map(|_| Partition {
                state: Mutex::new(PartitionState {
                    entries: VecDeque::new(),
                    next_offset: 1,
                    committed: 0,
                }),
                data: Notify::new(),
                space: Notify::new(),
            })
            .collect();
        Self {
            config,
            partitions,
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    fn partition(&self, partition: u32) -> PipelineResult<&Partition> {
        self.partitions
            .get(partition as usize)
            .ok_or(PipelineError::UnknownPartition(partition))
    }

    /// Enqueue raw bytes. Tests use this to exercise the dead-letter
    /// path with undecodable payloads.
    pub async fn publish_raw(
        &self,
        partition: u32,
        payload: Vec<u8>,
        wait: Duration,
    ) -> PipelineResult<u64> {
        let target = self.partition(partition)?;
        let payload = Arc::new(payload);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            {
                let mut state = target.state.lock().await;
                if state.entries.len() < self.config.capacity {
                    let offset = state.next_offset;
                    state.next_offset += 1;
                    state.entries.push_back((offset, payload.clone()));
                    drop(state);
                    target.data.notify_waiters();
                    return Ok(offset);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero()
                || timeout(remaining, target.space.notified()).await.is_err()
            {
                warn!(partition, "pipeline backpressure timeout");
                return Err(PipelineError::Backpressure {
                    partition,
                    waited_ms: wait.as_millis() as u64,
                });
            }
        }
    }
}

#[async_trait]
impl PipelineProducer for InMemoryPipeline {
    async fn publish(&self, event: &AuthorityEvent, wait: Duration) -> PipelineResult<()> {
        let payload = caracal_crypto::canonical_bytes(event)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        let partition = partition_for(&event.principal_id, self.config.partitions);
        let offset = self.publish_raw(partition, payload, wait).await?;
        debug!(partition, offset, principal = %event.principal_id, "event published");
        Ok(())
    }

    fn partition_count(&self) -> u32 {
        self.config.partitions
    }
}

#[async_trait]
impl PipelineConsumer for InMemoryPipeline {
    async fn poll(
        &self,
        partition: u32,
        max: usize,
        wait: Duration,
    ) -> PipelineResult<Vec<Delivery>> {
        let target = self.partition(partition)?;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            {
                let state = target.state.lock().await;
                if !state.entries.is_empty() {
                    return Ok(state
                        .entries
                        .iter()
                        .take(max.max(1))
                        .map(|(offset, payload)| Delivery {
                            offset: *offset,
                            payload: payload.as_ref().clone(),
                        })
                        .collect());
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = timeout(remaining, target.data.notified()).await;
        }
    }

    async fn commit(&self, partition: u32, offset: u64) -> PipelineResult<()> {
        let target = self.partition(partition)?;
        let mut state = target.state.lock().await;
        while state
            .entries
            .front()
            .is_some_and(|(front, _)| *front <= offset)
        {
            state.entries.pop_front();
        }
        if offset > state.committed {
            state.committed = offset;
        }
        drop(state);
        target.space.notify_waiters();
        Ok(())
    }

    async fn quarantine(
        &self,
        partition: u32,
        offset: u64,
        kind: &str,
        payload: Vec<u8>,
    ) -> PipelineResult<()> {
        warn!(partition, offset, kind, "quarantining undecodable payload");
        self.dead_letters.lock().await.push(DeadLetter {
            kind: kind.to_string(),
            partition,
            offset,
            payload,
            quarantined_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self) -> PipelineResult<Vec<DeadLetter>> {
        Ok(self.dead_letters.lock().await.clone())
    }
}
