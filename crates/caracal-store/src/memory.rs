//! In-memory reference backend.
//!
//! Deterministic and test-friendly. Production deployments use the
//! PostgreSQL backend for source-of-truth data; the trait surfaces are
//! identical.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use caracal_types::{
    AuthorityPolicy, BatchId, EventKind, IdempotencyKey, LedgerEvent, Mandate, MandateId,
    MerkleBatch, PolicyId, Principal, PrincipalId, Revocation, SigningKeyRecord,
};

use crate::model::{MandateLookup, NewPrincipal, PolicyDraft, QueryWindow};
use crate::traits::{
    EventStore, KeyStore, LeaseStore, MandateStore, PolicyStore, PrincipalStore, ReplayStore,
    SequenceStore,
};
use crate::{StoreError, StoreResult};

const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;
const DEFAULT_REPLAY_CAPACITY: usize = 100_000;

#[derive(Clone)]
struct LeaseRow {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct EventTables {
    by_seq: BTreeMap<u64, LedgerEvent>,
    idempotency: HashSet<String>,
    offsets: HashMap<u32, u64>,
    batches: HashMap<BatchId, MerkleBatch>,
}

/// In-memory store implementing the full trait bundle.
pub struct InMemoryStore {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
    policies: RwLock<HashMap<PrincipalId, Vec<AuthorityPolicy>>>,
    mandates: RwLock<HashMap<MandateId, Mandate>>,
    children: RwLock<HashMap<MandateId, Vec<MandateId>>>,
    revocations: RwLock<HashMap<MandateId, Revocation>>,
    nonces: RwLock<HashMap<String, DateTime<Utc>>>,
    sequence: Mutex<u64>,
    keys: RwLock<Vec<SigningKeyRecord>>,
    leases: RwLock<HashMap<u32, LeaseRow>>,
    events: RwLock<EventTables>,
    policy_bumps: broadcast::Sender<PrincipalId>,
    replay_window: Duration,
    replay_capacity: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (policy_bumps, _) = broadcast::channel(64);
        Self {
            principals: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            mandates: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            revocations: RwLock::new(HashMap::new()),
            nonces: RwLock::new(HashMap::new()),
            sequence: Mutex::new(0),
            keys: RwLock::new(Vec::new()),
            leases: RwLock::new(HashMap::new()),
            events: RwLock::new(EventTables::default()),
            policy_bumps,
            replay_window: Duration::seconds(DEFAULT_REPLAY_WINDOW_SECS),
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }

    pub fn with_replay_window(mut self, window: Duration, capacity: usize) -> Self {
        self.replay_window = window;
        self.replay_capacity = capacity;
        self
    }

    /// Overwrite a persisted event row in place, bypassing immutability.
    /// Exists solely for tamper-detection drills; nothing in the write
    /// path calls it.
    pub fn overwrite_event_unchecked(&self, event: LedgerEvent) -> StoreResult<()> {
        let mut tables = self.events_mut()?;
        tables.by_seq.insert(event.seq, event);
        Ok(())
    }

    fn events_mut(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, EventTables>> {
        self.events
            .write()
            .map_err(|_| StoreError::Backend("event tables lock poisoned".to_string()))
    }

    fn events_ref(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, EventTables>> {
        self.events
            .read()
            .map_err(|_| StoreError::Backend("event tables lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_guard<'a, T>(
    lock: &'a RwLock<T>,
    what: &str,
) -> StoreResult<std::sync::RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| StoreError::Backend(format!("{what} lock poisoned")))
}

fn write_guard<'a, T>(
    lock: &'a RwLock<T>,
    what: &str,
) -> StoreResult<std::sync::RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| StoreError::Backend(format!("{what} lock poisoned")))
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryStore {
    async fn register_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut principals = write_guard(&self.principals, "principals")?;

        if principals
            .values()
            .any(|p| p.workspace == new.workspace && p.name == new.name)
        {
            return Err(StoreError::DuplicateName(format!(
                "{}/{}",
                new.workspace, new.name
            )));
        }

        if let Some(parent_id) = &new.parent_id {
            if !principals.contains_key(parent_id) {
                return Err(StoreError::UnknownParent(parent_id.to_string()));
            }
        }

        let principal = Principal {
            id: PrincipalId::generate(),
            workspace: new.workspace,
            name: new.name,
            owner: new.owner,
            kind: new.kind,
            parent_id: new.parent_id,
            metadata: new.metadata,
            public_key: new.public_key,
            algorithm: new.algorithm,
            created_at: Utc::now(),
            retired_at: None,
        };
        principals.insert(principal.id.clone(), principal.clone());
        Ok(principal)
    }

    async fn get_principal(&self, id: &PrincipalId) -> StoreResult<Option<Principal>> {
        Ok(read_guard(&self.principals, "principals")?.get(id).cloned())
    }

    async fn find_principal(&self, workspace: &str, name: &str) -> StoreResult<Option<Principal>> {
        Ok(read_guard(&self.principals, "principals")?
            .values()
            .find(|p| p.workspace == workspace && p.name == name)
            .cloned())
    }

    async fn retire_principal(&self, id: &PrincipalId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut principals = write_guard(&self.principals, "principals")?;
        let principal = principals
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        if principal.retired_at.is_none() {
            principal.retired_at = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn put_policy(&self, draft: PolicyDraft) -> StoreResult<AuthorityPolicy> {
        {
            let principals = read_guard(&self.principals, "principals")?;
            if !principals.contains_key(&draft.principal_id) {
                return Err(StoreError::NotFound(format!(
                    "principal {}",
                    draft.principal_id
                )));
            }
        }

        let mut policies = write_guard(&self.policies, "policies")?;
        let versions = policies.entry(draft.principal_id.clone()).or_default();
        let policy = AuthorityPolicy {
            id: PolicyId::generate(),
            principal_id: draft.principal_id.clone(),
            version: versions.len() as u32 + 1,
            resource_patterns: draft.resource_patterns,
            allowed_actions: draft.allowed_actions,
            max_validity_seconds: draft.max_validity_seconds,
            max_delegation_depth: draft.max_delegation_depth,
            effective_from: draft.effective_from,
            change_reason: draft.change_reason,
        };
        versions.push(policy.clone());

        // Best-effort: nobody listening is fine.
        let _ = self.policy_bumps.send(draft.principal_id);
        Ok(policy)
    }

    async fn current_policy(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<Option<AuthorityPolicy>> {
        Ok(read_guard(&self.policies, "policies")?
            .get(principal)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn policy_at(
        &self,
        principal: &PrincipalId,
        version: u32,
    ) -> StoreResult<Option<AuthorityPolicy>> {
        Ok(read_guard(&self.policies, "policies")?
            .get(principal)
            .and_then(|versions| versions.iter().find(|p| p.version == version).cloned()))
    }

    fn policy_bumps(&self) -> broadcast::Receiver<PrincipalId> {
        self.policy_bumps.subscribe()
    }
}

#[async_trait]
impl MandateStore for InMemoryStore {
    async fn insert_mandate(&self, mandate: Mandate) -> StoreResult<()> {
        let mut mandates = write_guard(&self.mandates, "mandates")?;
        if mandates.contains_key(&mandate.id) {
            return Err(StoreError::Conflict(format!(
                "mandate {} already exists",
                mandate.id
            )));
        }
        if let Some(parent_id) = &mandate.parent_id {
            if !mandates.contains_key(parent_id) {
                return Err(StoreError::UnknownParent(parent_id.to_string()));
            }
            let mut children = write_guard(&self.children, "children")?;
            children
                .entry(parent_id.clone())
                .or_default()
                .push(mandate.id.clone());
        }
        mandates.insert(mandate.id.clone(), mandate);
        Ok(())
    }

    async fn get_mandate(&self, id: &MandateId) -> StoreResult<Option<Mandate>> {
        Ok(read_guard(&self.mandates, "mandates")?.get(id).cloned())
    }

    async fn lookup_mandate(&self, id: &MandateId) -> StoreResult<Option<MandateLookup>> {
        let mandates = read_guard(&self.mandates, "mandates")?;
        let revocations = read_guard(&self.revocations, "revocations")?;

        let Some(mandate) = mandates.get(id).cloned() else {
            return Ok(None);
        };

        let mut chain = vec![id.clone()];
        let mut revoked_in_chain = revocations.contains_key(id);
        let mut missing_ancestor = None;
        let mut seen: HashSet<MandateId> = HashSet::from([id.clone()]);
        let mut cursor = mandate.parent_id.clone();

        while let Some(ancestor_id) = cursor {
            if !seen.insert(ancestor_id.clone()) {
                // Chains are acyclic by construction; a cycle means the
                // store itself is corrupt.
                return Err(StoreError::InvariantViolation(format!(
                    "mandate chain cycle at {ancestor_id}"
                )));
            }
            match mandates.get(&ancestor_id) {
                Some(ancestor) => {
                    revoked_in_chain |= revocations.contains_key(&ancestor_id);
                    chain.push(ancestor_id.clone());
                    cursor = ancestor.parent_id.clone();
                }
                None => {
                    missing_ancestor = Some(ancestor_id);
                    break;
                }
            }
        }

        chain.reverse();
        Ok(Some(MandateLookup {
            mandate,
            revoked_in_chain,
            chain,
            missing_ancestor,
        }))
    }

    async fn insert_revocation(&self, revocation: Revocation) -> StoreResult<()> {
        let mut revocations = write_guard(&self.revocations, "revocations")?;
        // Idempotent: the first tombstone wins.
        revocations
            .entry(revocation.mandate_id.clone())
            .or_insert(revocation);
        Ok(())
    }

    async fn get_revocation(&self, id: &MandateId) -> StoreResult<Option<Revocation>> {
        Ok(read_guard(&self.revocations, "revocations")?
            .get(id)
            .cloned())
    }

    async fn children_of(&self, id: &MandateId) -> StoreResult<Vec<MandateId>> {
        Ok(read_guard(&self.children, "children")?
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReplayStore for InMemoryStore {
    async fn record_nonce(&self, nonce: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut nonces = write_guard(&self.nonces, "nonces")?;

        if let Some(seen_at) = nonces.get(nonce) {
            if now - *seen_at < self.replay_window {
                return Ok(false);
            }
        }

        if nonces.len() >= self.replay_capacity {
            // Bounded memory: evict the oldest entry before inserting.
            if let Some(oldest) = nonces
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone())
            {
                nonces.remove(&oldest);
            }
        }

        nonces.insert(nonce.to_string(), now);
        Ok(true)
    }

    async fn sweep_nonces(&self, now: DateTime<Utc>, window: Duration) -> StoreResult<usize> {
        let mut nonces = write_guard(&self.nonces, "nonces")?;
        let before = nonces.len();
        nonces.retain(|_, seen_at| now - *seen_at < window);
        Ok(before - nonces.len())
    }
}

#[async_trait]
impl SequenceStore for InMemoryStore {
    async fn next_sequence(&self) -> StoreResult<u64> {
        let mut counter = self
            .sequence
            .lock()
            .map_err(|_| StoreError::Backend("sequence lock poisoned".to_string()))?;
        *counter += 1;
        Ok(*counter)
    }

    async fn current_sequence(&self) -> StoreResult<u64> {
        let counter = self
            .sequence
            .lock()
            .map_err(|_| StoreError::Backend("sequence lock poisoned".to_string()))?;
        Ok(*counter)
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn register_key(&self, record: SigningKeyRecord) -> StoreResult<()> {
        let mut keys = write_guard(&self.keys, "keys")?;
        if keys.iter().any(|k| k.id == record.id) {
            return Err(StoreError::Conflict(format!(
                "signing key {} already exists",
                record.id
            )));
        }
        keys.push(record);
        Ok(())
    }

    async fn get_key(&self, id: &caracal_types::KeyId) -> StoreResult<Option<SigningKeyRecord>> {
        Ok(read_guard(&self.keys, "keys")?
            .iter()
            .find(|k| &k.id == id)
            .cloned())
    }

    async fn active_key(&self) -> StoreResult<Option<SigningKeyRecord>> {
        Ok(read_guard(&self.keys, "keys")?
            .iter()
            .filter(|k| !k.is_retired())
            .max_by_key(|k| k.created_at)
            .cloned())
    }

    async fn retire_key(&self, id: &caracal_types::KeyId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut keys = write_guard(&self.keys, "keys")?;
        let key = keys
            .iter_mut()
            .find(|k| &k.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("signing key {id}")))?;
        if key.retired_at.is_none() {
            key.retired_at = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn acquire_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut leases = write_guard(&self.leases, "leases")?;
        match leases.get(&partition) {
            Some(row) if row.holder != holder && row.expires_at > now => Ok(false),
            _ => {
                leases.insert(
                    partition,
                    LeaseRow {
                        holder: holder.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn heartbeat_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut leases = write_guard(&self.leases, "leases")?;
        match leases.get_mut(&partition) {
            Some(row) if row.holder == holder && row.expires_at > now => {
                row.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, partition: u32, holder: &str) -> StoreResult<()> {
        let mut leases = write_guard(&self.leases, "leases")?;
        if let Some(row) = leases.get(&partition) {
            if row.holder == holder {
                leases.remove(&partition);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append_events(
        &self,
        partition: u32,
        events: Vec<LedgerEvent>,
        committed_offset: u64,
    ) -> StoreResult<()> {
        let mut tables = self.events_mut()?;

        for event in &events {
            if tables.by_seq.contains_key(&event.seq) {
                return Err(StoreError::Conflict(format!(
                    "sequence {} already persisted",
                    event.seq
                )));
            }
        }

        for event in events {
            tables
                .idempotency
                .insert(event.event.idempotency_key().as_index_key());
            tables.by_seq.insert(event.seq, event);
        }
        tables.offsets.insert(partition, committed_offset);
        Ok(())
    }

    async fn has_idempotency_key(&self, key: &IdempotencyKey) -> StoreResult<bool> {
        Ok(self.events_ref()?.idempotency.contains(&key.as_index_key()))
    }

    async fn committed_offset(&self, partition: u32) -> StoreResult<Option<u64>> {
        Ok(self.events_ref()?.offsets.get(&partition).copied())
    }

    async fn get_event(&self, seq: u64) -> StoreResult<Option<LedgerEvent>> {
        Ok(self.events_ref()?.by_seq.get(&seq).cloned())
    }

    async fn events_in_range(&self, lo: u64, hi: u64) -> StoreResult<Vec<LedgerEvent>> {
        if lo == 0 || lo > hi {
            return Err(StoreError::InvalidInput(format!(
                "invalid sequence range [{lo}, {hi}]"
            )));
        }
        Ok(self.events_ref()?.by_seq.range(lo..=hi).map(|(_, e)| e.clone()).collect())
    }

    async fn events_for_principal(
        &self,
        principal: &PrincipalId,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEvent>> {
        let events: Vec<LedgerEvent> = self
            .events_ref()?
            .by_seq
            .values()
            .filter(|e| &e.event.principal_id == principal)
            .cloned()
            .collect();
        Ok(apply_window(events, window))
    }

    async fn unbatched_events(
        &self,
        after_seq: u64,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEvent>> {
        let unbatched = self
            .events_ref()?
            .by_seq
            .range(after_seq + 1..)
            .map(|(_, e)| e)
            .filter(|e| e.batch_id.is_none())
            .cloned()
            .collect::<Vec<_>>();
        Ok(if limit == 0 {
            unbatched
        } else {
            unbatched.into_iter().take(limit).collect()
        })
    }

    async fn insert_batch(&self, batch: MerkleBatch, member_seqs: &[u64]) -> StoreResult<()> {
        if member_seqs.is_empty() {
            return Err(StoreError::InvalidInput(
                "a batch must contain at least one event".to_string(),
            ));
        }

        let mut tables = self.events_mut()?;
        if tables.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!(
                "batch {} already exists",
                batch.id
            )));
        }

        for seq in member_seqs {
            match tables.by_seq.get(seq) {
                Some(event) if event.batch_id.is_none() => {}
                Some(event) => {
                    return Err(StoreError::InvariantViolation(format!(
                        "event {} already sealed into batch {:?}",
                        seq, event.batch_id
                    )));
                }
                None => {
                    return Err(StoreError::NotFound(format!("event {seq}")));
                }
            }
        }

        // Batch row plus every back-pointer land together or not at all.
        for seq in member_seqs {
            if let Some(event) = tables.by_seq.get_mut(seq) {
                event.batch_id = Some(batch.id.clone());
            }
        }
        tables.batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<MerkleBatch>> {
        Ok(self.events_ref()?.batches.get(id).cloned())
    }

    async fn batch_for_seq(&self, seq: u64) -> StoreResult<Option<MerkleBatch>> {
        let tables = self.events_ref()?;
        Ok(tables
            .by_seq
            .get(&seq)
            .and_then(|e| e.batch_id.as_ref())
            .and_then(|id| tables.batches.get(id))
            .cloned())
    }

    async fn events_for_batch(&self, id: &BatchId) -> StoreResult<Vec<LedgerEvent>> {
        Ok(self
            .events_ref()?
            .by_seq
            .values()
            .filter(|e| e.batch_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    async fn issuance_event(&self, mandate: &MandateId) -> StoreResult<Option<LedgerEvent>> {
        Ok(self
            .events_ref()?
            .by_seq
            .values()
            .find(|e| {
                e.event.kind == EventKind::Issued && e.event.mandate_id.as_ref() == Some(mandate)
            })
            .cloned())
    }
}
