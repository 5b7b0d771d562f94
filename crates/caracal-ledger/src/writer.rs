use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use caracal_crypto::SignerHandle;
use caracal_pipeline::{partition_for, Delivery, PipelineConsumer};
use caracal_store::{CaracalStore, EventStore, LeaseStore, SequenceStore};
use caracal_types::{BatchCloseReason, Clock, KeyId, LedgerEvent};

use crate::batcher::{BatcherConfig, MerkleBatcher};
use crate::error::LedgerError;

/// Writer tuning. Defaults carry the contract values.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Total pipeline partitions; used to filter recovered events back to
    /// their owning writer.
    pub partitions: u32,
    pub poll_max: usize,
    pub poll_wait: Duration,
    pub batch: BatcherConfig,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub lease_ttl: ChronoDuration,
    /// How many unbatched events one recovery scan loads at a time. The
    /// cadence is deployment-tunable, never baked in.
    pub recovery_scan_chunk: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            poll_max: 256,
            poll_wait: Duration::from_millis(250),
            batch: BatcherConfig::default(),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(5),
            lease_ttl: ChronoDuration::seconds(10),
            recovery_scan_chunk: 1024,
        }
    }
}

/// Single-threaded writer for one partition.
///
/// Holds the partition lease, folds pipeline deliveries into the ledger
/// exactly once, and feeds the Merkle batcher it exclusively owns.
pub struct PartitionWriter {
    partition: u32,
    holder: String,
    store: Arc<dyn CaracalStore>,
    pipeline: Arc<dyn PipelineConsumer>,
    signer: Arc<SignerHandle>,
    signer_key_id: KeyId,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    batcher: MerkleBatcher,
}

impl PartitionWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: u32,
        store: Arc<dyn CaracalStore>,
        pipeline: Arc<dyn PipelineConsumer>,
        signer: Arc<SignerHandle>,
        signer_key_id: KeyId,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        let batcher = MerkleBatcher::new(config.batch);
        Self {
            partition,
            holder: format!("writer-{partition}-{}", uuid::Uuid::new_v4()),
            store,
            pipeline,
            signer,
            signer_key_id,
            clock,
            config,
            batcher,
        }
    }

    /// Run until the shutdown signal flips, then drain: the current
    /// buffer seals with reason `shutdown` before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), LedgerError> {
        self.acquire_lease(&mut shutdown).await?;
        self.recover().await?;
        info!(partition = self.partition, holder = %self.holder, "ledger writer running");

        let mut backoff = self.config.backoff_base;
        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self
                .store
                .heartbeat_lease(
                    self.partition,
                    &self.holder,
                    self.config.lease_ttl,
                    self.clock.now(),
                )
                .await?
            {
                warn!(partition = self.partition, "lease lost, re-acquiring");
                self.acquire_lease(&mut shutdown).await?;
            }

            let deliveries = match self
                .pipeline
                .poll(self.partition, self.config.poll_max, self.config.poll_wait)
                .await
            {
                Ok(deliveries) => {
                    backoff = self.config.backoff_base;
                    deliveries
                }
                Err(e) => {
                    // Bounded exponential backoff, then try again.
                    warn!(partition = self.partition, error = %e, "pipeline read failed");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.backoff_cap);
                    continue;
                }
            };

            if !deliveries.is_empty() {
                self.ingest(deliveries).await?;
            }

            if let Some(reason) = self.batcher.due(self.clock.now()) {
                self.seal_and_persist(reason).await?;
            }
        }

        // Graceful drain. Writers are never cancelled mid-transaction.
        if !self.batcher.is_empty() {
            self.seal_and_persist(BatchCloseReason::Shutdown).await?;
        }
        self.store
            .release_lease(self.partition, &self.holder)
            .await?;
        info!(partition = self.partition, "ledger writer drained");
        Ok(())
    }

    async fn acquire_lease(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), LedgerError> {
        let mut backoff = self.config.backoff_base;
        loop {
            if *shutdown.borrow() {
                return Err(LedgerError::LeaseUnavailable(self.partition));
            }
            if self
                .store
                .acquire_lease(
                    self.partition,
                    &self.holder,
                    self.config.lease_ttl,
                    self.clock.now(),
                )
                .await?
            {
                return Ok(());
            }
            debug!(partition = self.partition, "lease held elsewhere, retrying");
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.backoff_cap);
        }
    }

    /// Rebuild the in-memory buffer from events whose batch back-pointer
    /// is still null, in sequence order.
    async fn recover(&mut self) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let mut recovered = 0usize;
        let mut cursor = 0u64;
        loop {
            let chunk = self
                .store
                .unbatched_events(cursor, self.config.recovery_scan_chunk)
                .await?;
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();
            for event in chunk {
                cursor = cursor.max(event.seq);
                if partition_for(&event.event.principal_id, self.config.partitions)
                    != self.partition
                {
                    continue;
                }
                self.batcher.push(event, now);
                recovered += 1;
            }
            if chunk_len < self.config.recovery_scan_chunk {
                break;
            }
        }
        if recovered > 0 {
            info!(partition = self.partition, recovered, "re-buffered unbatched events");
        }
        Ok(())
    }

    async fn ingest(&mut self, deliveries: Vec<Delivery>) -> Result<(), LedgerError> {
        let last_offset = deliveries.last().map(|d| d.offset).unwrap_or_default();
        let mut fresh: Vec<LedgerEvent> = Vec::new();

        for delivery in deliveries {
            let event = match delivery.decode() {
                Ok(event) => event,
                Err(e) => {
                    // Permanently undecodable: quarantine, keep the flow.
                    self.pipeline
                        .quarantine(
                            self.partition,
                            delivery.offset,
                            "deserialization",
                            delivery.payload,
                        )
                        .await?;
                    debug!(partition = self.partition, offset = delivery.offset,
                           error = %e, "payload quarantined");
                    continue;
                }
            };

            // O(1) duplicate drop via the idempotency index.
            if self
                .store
                .has_idempotency_key(&event.idempotency_key())
                .await?
            {
                debug!(partition = self.partition, nonce = %event.nonce, "duplicate dropped");
                continue;
            }

            let seq = self.store.next_sequence().await?;
            fresh.push(LedgerEvent::sealed(seq, event)?);
        }

        if !fresh.is_empty() {
            // Retry the same sealed events on transient failure: their
            // sequence numbers are already allocated and must not leak.
            let mut backoff = self.config.backoff_base;
            loop {
                match self
                    .store
                    .append_events(self.partition, fresh.clone(), last_offset)
                    .await
                {
                    Ok(()) => break,
                    Err(e) if e.is_retryable() => {
                        warn!(partition = self.partition, error = %e, "append retry");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.backoff_cap);
                    }
                    Err(e) => {
                        error!(partition = self.partition, error = %e, "append failed");
                        return Err(e.into());
                    }
                }
            }
        }

        // The ledger transaction advanced the durable offset; release the
        // pipeline entries now that persistence is certain.
        if last_offset > 0 {
            self.pipeline.commit(self.partition, last_offset).await?;
        }

        let now = self.clock.now();
        for event in fresh {
            self.batcher.push(event, now);
        }
        Ok(())
    }

    pub(crate) async fn seal_and_persist(
        &mut self,
        reason: BatchCloseReason,
    ) -> Result<(), LedgerError> {
        let sealed = self.batcher.seal(
            reason,
            self.signer.as_ref(),
            &self.signer_key_id,
            self.clock.now(),
        )?;
        self.store
            .insert_batch(sealed.batch.clone(), &sealed.member_seqs)
            .await?;
        info!(partition = self.partition, batch = %sealed.batch.id,
              events = sealed.member_seqs.len(), reason = ?reason, "batch persisted");
        Ok(())
    }
}
