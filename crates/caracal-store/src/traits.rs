use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use caracal_types::{
    AuthorityPolicy, BatchId, IdempotencyKey, KeyId, LedgerEvent, Mandate, MandateId, MerkleBatch,
    Principal, PrincipalId, Revocation, SigningKeyRecord,
};

use crate::model::{MandateLookup, NewPrincipal, PolicyDraft, QueryWindow};
use crate::StoreResult;

/// Canonical principal records.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Register a principal. Fails with `DuplicateName` when the
    /// (workspace, name) pair collides and `UnknownParent` when the parent
    /// reference does not resolve.
    async fn register_principal(&self, new: NewPrincipal) -> StoreResult<Principal>;

    async fn get_principal(&self, id: &PrincipalId) -> StoreResult<Option<Principal>>;

    async fn find_principal(&self, workspace: &str, name: &str) -> StoreResult<Option<Principal>>;

    /// Soft tombstone. Identity fields are never mutated and the row is
    /// never physically deleted.
    async fn retire_principal(&self, id: &PrincipalId, now: DateTime<Utc>) -> StoreResult<()>;
}

/// Append-only policy versions.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Write a new version row and atomically flip the current-version
    /// pointer. Prior versions remain addressable.
    async fn put_policy(&self, draft: PolicyDraft) -> StoreResult<AuthorityPolicy>;

    async fn current_policy(&self, principal: &PrincipalId)
        -> StoreResult<Option<AuthorityPolicy>>;

    /// Historical version, for validating mandates issued under it.
    async fn policy_at(
        &self,
        principal: &PrincipalId,
        version: u32,
    ) -> StoreResult<Option<AuthorityPolicy>>;

    /// Version-bump notifications, consumed by read-through caches.
    fn policy_bumps(&self) -> broadcast::Receiver<PrincipalId>;
}

/// Mandate rows and the revocation side-table.
#[async_trait]
pub trait MandateStore: Send + Sync {
    async fn insert_mandate(&self, mandate: Mandate) -> StoreResult<()>;

    async fn get_mandate(&self, id: &MandateId) -> StoreResult<Option<Mandate>>;

    /// Hot path for the validator: the record plus a revoked-in-chain flag
    /// computed by walking parent pointers.
    async fn lookup_mandate(&self, id: &MandateId) -> StoreResult<Option<MandateLookup>>;

    /// Idempotent tombstone write.
    async fn insert_revocation(&self, revocation: Revocation) -> StoreResult<()>;

    async fn get_revocation(&self, id: &MandateId) -> StoreResult<Option<Revocation>>;

    /// Direct children, for cascade walks.
    async fn children_of(&self, id: &MandateId) -> StoreResult<Vec<MandateId>>;
}

/// Replay-protection cache shared across validator instances.
///
/// Keyed on the nonce alone: a replayed nonce is rejected even when the
/// caller shifts the accompanying timestamp, which is checked separately
/// against the drift window. See the replay-cache entry in DESIGN.md.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Record a nonce. Returns `true` when the nonce was fresh and `false`
    /// when it was already seen inside the window.
    async fn record_nonce(&self, nonce: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Drop entries older than `window`. Returns how many were evicted.
    async fn sweep_nonces(&self, now: DateTime<Utc>, window: Duration) -> StoreResult<usize>;
}

/// The global, gap-free sequence allocator. The single cross-partition
/// synchronization point; throughput here bounds overall write rate.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Transactional fetch-and-increment. First value is 1.
    async fn next_sequence(&self) -> StoreResult<u64>;

    /// Highest allocated value, 0 when none.
    async fn current_sequence(&self) -> StoreResult<u64>;
}

/// Root-signing key registry.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn register_key(&self, record: SigningKeyRecord) -> StoreResult<()>;

    async fn get_key(&self, id: &KeyId) -> StoreResult<Option<SigningKeyRecord>>;

    /// The newest non-retired key, used for new batches.
    async fn active_key(&self) -> StoreResult<Option<SigningKeyRecord>>;

    /// Retire a key. It remains resolvable for verification.
    async fn retire_key(&self, id: &KeyId, now: DateTime<Utc>) -> StoreResult<()>;
}

/// Short-lived, heartbeated partition leases for ledger writers.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Acquire the partition lease. Returns `false` when another live
    /// holder owns it.
    async fn acquire_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Extend an owned lease. Returns `false` when the lease was lost.
    async fn heartbeat_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn release_lease(&self, partition: u32, holder: &str) -> StoreResult<()>;
}

/// Authority-event and Merkle-batch persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append sequenced events and advance the partition offset in one
    /// transaction. Also records each event's idempotency key. This
    /// single transaction is what turns at-least-once delivery into
    /// exactly-once persistence.
    async fn append_events(
        &self,
        partition: u32,
        events: Vec<LedgerEvent>,
        committed_offset: u64,
    ) -> StoreResult<()>;

    /// O(1) duplicate probe against the idempotency index.
    async fn has_idempotency_key(&self, key: &IdempotencyKey) -> StoreResult<bool>;

    /// Last offset durably folded into the ledger for a partition.
    async fn committed_offset(&self, partition: u32) -> StoreResult<Option<u64>>;

    async fn get_event(&self, seq: u64) -> StoreResult<Option<LedgerEvent>>;

    /// Inclusive range, ordered by sequence.
    async fn events_in_range(&self, lo: u64, hi: u64) -> StoreResult<Vec<LedgerEvent>>;

    async fn events_for_principal(
        &self,
        principal: &PrincipalId,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEvent>>;

    /// Events with no batch back-pointer and sequence above `after_seq`,
    /// ordered by sequence. Used to rebuild writer buffers after a crash.
    async fn unbatched_events(&self, after_seq: u64, limit: usize)
        -> StoreResult<Vec<LedgerEvent>>;

    /// Insert a sealed batch row and back-point every member event at it,
    /// in one transaction. No partial batch is ever visible.
    async fn insert_batch(&self, batch: MerkleBatch, member_seqs: &[u64]) -> StoreResult<()>;

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<MerkleBatch>>;

    /// The batch an event was sealed into, via its back-pointer.
    async fn batch_for_seq(&self, seq: u64) -> StoreResult<Option<MerkleBatch>>;

    /// Member events of a batch, ordered by sequence. These are the tree
    /// leaves.
    async fn events_for_batch(&self, id: &BatchId) -> StoreResult<Vec<LedgerEvent>>;

    /// The `issued` event of a mandate, for chain traces.
    async fn issuance_event(&self, mandate: &MandateId) -> StoreResult<Option<LedgerEvent>>;
}

/// Unified store bundle consumed by gateway, writer, and verifier.
pub trait CaracalStore:
    PrincipalStore
    + PolicyStore
    + MandateStore
    + ReplayStore
    + SequenceStore
    + KeyStore
    + LeaseStore
    + EventStore
    + Send
    + Sync
{
}

impl<T> CaracalStore for T where
    T: PrincipalStore
        + PolicyStore
        + MandateStore
        + ReplayStore
        + SequenceStore
        + KeyStore
        + LeaseStore
        + EventStore
        + Send
        + Sync
{
}
