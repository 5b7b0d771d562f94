//! PostgreSQL adapter for the Caracal store.
//!
//! The transactional source-of-truth backend. Records are stored as JSONB
//! alongside the key columns the hot paths filter on; the schema mirrors
//! the logical tables of the persistence contract. Version-bump
//! notifications are process-local; cross-process caches fall back to
//! their TTL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::sync::broadcast;

use caracal_types::{
    AuthorityPolicy, BatchId, IdempotencyKey, KeyId, LedgerEvent, Mandate, MandateId, MerkleBatch,
    PolicyId, Principal, PrincipalId, Revocation, SigningKeyRecord,
};

use crate::model::{MandateLookup, NewPrincipal, PolicyDraft, QueryWindow};
use crate::traits::{
    EventStore, KeyStore, LeaseStore, MandateStore, PolicyStore, PrincipalStore, ReplayStore,
    SequenceStore,
};
use crate::{StoreError, StoreResult};

const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;

/// PostgreSQL-backed store implementing the full trait bundle.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    policy_bumps: broadcast::Sender<PrincipalId>,
    replay_window: Duration,
}

impl PostgresStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let (policy_bumps, _) = broadcast::channel(64);
        let store = Self {
            pool,
            policy_bumps,
            replay_window: Duration::seconds(DEFAULT_REPLAY_WINDOW_SECS),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS caracal_principals (
                id TEXT PRIMARY KEY,
                workspace TEXT NOT NULL,
                name TEXT NOT NULL,
                record JSONB NOT NULL,
                UNIQUE (workspace, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_policies (
                principal_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                record JSONB NOT NULL,
                PRIMARY KEY (principal_id, version)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_mandates (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                record JSONB NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS caracal_mandates_parent
                ON caracal_mandates (parent_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_revocations (
                mandate_id TEXT PRIMARY KEY,
                record JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_nonces (
                nonce TEXT PRIMARY KEY,
                seen_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_sequence (
                id INT PRIMARY KEY CHECK (id = 0),
                value BIGINT NOT NULL
            )
            "#,
            r#"
            INSERT INTO caracal_sequence (id, value) VALUES (0, 0)
                ON CONFLICT (id) DO NOTHING
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_signing_keys (
                id TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL,
                retired_at TIMESTAMPTZ,
                record JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_leases (
                partition INT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_events (
                seq BIGINT PRIMARY KEY,
                principal_id TEXT NOT NULL,
                mandate_id TEXT,
                kind TEXT NOT NULL,
                batch_id TEXT,
                idempotency_key TEXT NOT NULL UNIQUE,
                record JSONB NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS caracal_events_principal
                ON caracal_events (principal_id, seq)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS caracal_events_batch
                ON caracal_events (batch_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_offsets (
                partition INT PRIMARY KEY,
                committed BIGINT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS caracal_batches (
                id TEXT PRIMARY KEY,
                seq_lo BIGINT NOT NULL,
                seq_hi BIGINT NOT NULL,
                record JSONB NOT NULL
            )
            "#,
        ];

        for statement in ddl {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Transient(error.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(error.to_string()),
        _ => StoreError::Backend(error.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl PrincipalStore for PostgresStore {
    async fn register_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        if let Some(parent_id) = &new.parent_id {
            let exists = sqlx::query("SELECT 1 FROM caracal_principals WHERE id = $1")
                .bind(parent_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
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

        let result = sqlx::query(
            "INSERT INTO caracal_principals (id, workspace, name, record) VALUES ($1, $2, $3, $4)",
        )
        .bind(principal.id.as_str())
        .bind(&principal.workspace)
        .bind(&principal.name)
        .bind(to_json(&principal)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(principal),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::DuplicateName(format!("{}/{}", principal.workspace, principal.name)),
            ),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn get_principal(&self, id: &PrincipalId) -> StoreResult<Option<Principal>> {
        let row = sqlx::query("SELECT record FROM caracal_principals WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn find_principal(&self, workspace: &str, name: &str) -> StoreResult<Option<Principal>> {
        let row =
            sqlx::query("SELECT record FROM caracal_principals WHERE workspace = $1 AND name = $2")
                .bind(workspace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn retire_principal(&self, id: &PrincipalId, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE caracal_principals
               SET record = jsonb_set(record, '{retired_at}', to_jsonb($2::timestamptz))
             WHERE id = $1 AND record->>'retired_at' IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM caracal_principals WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("principal {id}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn put_policy(&self, draft: PolicyDraft) -> StoreResult<AuthorityPolicy> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let exists = sqlx::query("SELECT 1 FROM caracal_principals WHERE id = $1")
            .bind(draft.principal_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!(
                "principal {}",
                draft.principal_id
            )));
        }

        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS version FROM caracal_policies WHERE principal_id = $1",
        )
        .bind(draft.principal_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let next_version: i64 = row.get::<i64, _>("version") + 1;

        let policy = AuthorityPolicy {
            id: PolicyId::generate(),
            principal_id: draft.principal_id.clone(),
            version: next_version as u32,
            resource_patterns: draft.resource_patterns,
            allowed_actions: draft.allowed_actions,
            max_validity_seconds: draft.max_validity_seconds,
            max_delegation_depth: draft.max_delegation_depth,
            effective_from: draft.effective_from,
            change_reason: draft.change_reason,
        };

        sqlx::query(
            "INSERT INTO caracal_policies (principal_id, version, record) VALUES ($1, $2, $3)",
        )
        .bind(policy.principal_id.as_str())
        .bind(next_version)
        .bind(to_json(&policy)?)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let _ = self.policy_bumps.send(policy.principal_id.clone());
        Ok(policy)
    }

    async fn current_policy(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<Option<AuthorityPolicy>> {
        let row = sqlx::query(
            "SELECT record FROM caracal_policies WHERE principal_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(principal.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn policy_at(
        &self,
        principal: &PrincipalId,
        version: u32,
    ) -> StoreResult<Option<AuthorityPolicy>> {
        let row =
            sqlx::query("SELECT record FROM caracal_policies WHERE principal_id = $1 AND version = $2")
                .bind(principal.as_str())
                .bind(version as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    fn policy_bumps(&self) -> broadcast::Receiver<PrincipalId> {
        self.policy_bumps.subscribe()
    }
}

#[async_trait]
impl MandateStore for PostgresStore {
    async fn insert_mandate(&self, mandate: Mandate) -> StoreResult<()> {
        if let Some(parent_id) = &mandate.parent_id {
            let exists = sqlx::query("SELECT 1 FROM caracal_mandates WHERE id = $1")
                .bind(parent_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
                return Err(StoreError::UnknownParent(parent_id.to_string()));
            }
        }

        let result =
            sqlx::query("INSERT INTO caracal_mandates (id, parent_id, record) VALUES ($1, $2, $3)")
                .bind(mandate.id.as_str())
                .bind(mandate.parent_id.as_ref().map(|p| p.as_str()))
                .bind(to_json(&mandate)?)
                .execute(&self.pool)
                .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Conflict(format!("mandate {} already exists", mandate.id)),
            ),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn get_mandate(&self, id: &MandateId) -> StoreResult<Option<Mandate>> {
        let row = sqlx::query("SELECT record FROM caracal_mandates WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn lookup_mandate(&self, id: &MandateId) -> StoreResult<Option<MandateLookup>> {
        let Some(mandate) = self.get_mandate(id).await? else {
            return Ok(None);
        };

        let mut chain = vec![id.clone()];
        let mut revoked_in_chain = self.get_revocation(id).await?.is_some();
        let mut missing_ancestor = None;
        let mut seen = std::collections::HashSet::from([id.clone()]);
        let mut cursor = mandate.parent_id.clone();

        while let Some(ancestor_id) = cursor {
            if !seen.insert(ancestor_id.clone()) {
                return Err(StoreError::InvariantViolation(format!(
                    "mandate chain cycle at {ancestor_id}"
                )));
            }
            match self.get_mandate(&ancestor_id).await? {
                Some(ancestor) => {
                    revoked_in_chain |= self.get_revocation(&ancestor_id).await?.is_some();
                    chain.push(ancestor_id);
                    cursor = ancestor.parent_id;
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
        sqlx::query(
            r#"
            INSERT INTO caracal_revocations (mandate_id, record) VALUES ($1, $2)
                ON CONFLICT (mandate_id) DO NOTHING
            "#,
        )
        .bind(revocation.mandate_id.as_str())
        .bind(to_json(&revocation)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_revocation(&self, id: &MandateId) -> StoreResult<Option<Revocation>> {
        let row = sqlx::query("SELECT record FROM caracal_revocations WHERE mandate_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn children_of(&self, id: &MandateId) -> StoreResult<Vec<MandateId>> {
        let rows = sqlx::query("SELECT id FROM caracal_mandates WHERE parent_id = $1")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|r| MandateId::new(r.get::<String, _>("id")))
            .collect())
    }
}

#[async_trait]
impl ReplayStore for PostgresStore {
    async fn record_nonce(&self, nonce: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        // Fresh insert, or reuse of an entry that has aged out of the
        // window. The WHERE clause keeps live entries untouched so the
        // row count tells us which case we hit.
        let cutoff = now - self.replay_window;
        let result = sqlx::query(
            r#"
            INSERT INTO caracal_nonces (nonce, seen_at) VALUES ($1, $2)
                ON CONFLICT (nonce) DO UPDATE SET seen_at = EXCLUDED.seen_at
                WHERE caracal_nonces.seen_at < $3
            "#,
        )
        .bind(nonce)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep_nonces(&self, now: DateTime<Utc>, window: Duration) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM caracal_nonces WHERE seen_at < $1")
            .bind(now - window)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl SequenceStore for PostgresStore {
    async fn next_sequence(&self) -> StoreResult<u64> {
        let row =
            sqlx::query("UPDATE caracal_sequence SET value = value + 1 WHERE id = 0 RETURNING value")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(row.get::<i64, _>("value") as u64)
    }

    async fn current_sequence(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT value FROM caracal_sequence WHERE id = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.get::<i64, _>("value") as u64)
    }
}

#[async_trait]
impl KeyStore for PostgresStore {
    async fn register_key(&self, record: SigningKeyRecord) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO caracal_signing_keys (id, created_at, retired_at, record) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id.as_str())
        .bind(record.created_at)
        .bind(record.retired_at)
        .bind(to_json(&record)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Conflict(format!("signing key {} already exists", record.id)),
            ),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn get_key(&self, id: &KeyId) -> StoreResult<Option<SigningKeyRecord>> {
        let row = sqlx::query("SELECT record FROM caracal_signing_keys WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn active_key(&self) -> StoreResult<Option<SigningKeyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM caracal_signing_keys
             WHERE retired_at IS NULL
             ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn retire_key(&self, id: &KeyId, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE caracal_signing_keys
               SET retired_at = $2,
                   record = jsonb_set(record, '{retired_at}', to_jsonb($2::timestamptz))
             WHERE id = $1 AND retired_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM caracal_signing_keys WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("signing key {id}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for PostgresStore {
    async fn acquire_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO caracal_leases (partition, holder, expires_at) VALUES ($1, $2, $3)
                ON CONFLICT (partition) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE caracal_leases.holder = EXCLUDED.holder
                   OR caracal_leases.expires_at <= $4
            "#,
        )
        .bind(partition as i32)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat_lease(
        &self,
        partition: u32,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE caracal_leases SET expires_at = $3
             WHERE partition = $1 AND holder = $2 AND expires_at > $4
            "#,
        )
        .bind(partition as i32)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, partition: u32, holder: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM caracal_leases WHERE partition = $1 AND holder = $2")
            .bind(partition as i32)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn append_events(
        &self,
        partition: u32,
        events: Vec<LedgerEvent>,
        committed_offset: u64,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for event in &events {
            let result = sqlx::query(
                r#"
                INSERT INTO caracal_events
                    (seq, principal_id, mandate_id, kind, batch_id, idempotency_key, record)
                VALUES ($1, $2, $3, $4, NULL, $5, $6)
                "#,
            )
            .bind(event.seq as i64)
            .bind(event.event.principal_id.as_str())
            .bind(event.event.mandate_id.as_ref().map(|m| m.as_str()))
            .bind(to_json(&event.event.kind)?.as_str().unwrap_or_default().to_string())
            .bind(event.event.idempotency_key().as_index_key())
            .bind(to_json(event)?)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                return Err(match e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(
                        format!("sequence {} already persisted", event.seq),
                    ),
                    other => map_sqlx_error(other),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO caracal_offsets (partition, committed) VALUES ($1, $2)
                ON CONFLICT (partition) DO UPDATE SET committed = EXCLUDED.committed
            "#,
        )
        .bind(partition as i32)
        .bind(committed_offset as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn has_idempotency_key(&self, key: &IdempotencyKey) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM caracal_events WHERE idempotency_key = $1")
            .bind(key.as_index_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.is_some())
    }

    async fn committed_offset(&self, partition: u32) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT committed FROM caracal_offsets WHERE partition = $1")
            .bind(partition as i32)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|r| r.get::<i64, _>("committed") as u64))
    }

    async fn get_event(&self, seq: u64) -> StoreResult<Option<LedgerEvent>> {
        let row = sqlx::query("SELECT record FROM caracal_events WHERE seq = $1")
            .bind(seq as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn events_in_range(&self, lo: u64, hi: u64) -> StoreResult<Vec<LedgerEvent>> {
        if lo == 0 || lo > hi {
            return Err(StoreError::InvalidInput(format!(
                "invalid sequence range [{lo}, {hi}]"
            )));
        }
        let rows = sqlx::query(
            "SELECT record FROM caracal_events WHERE seq >= $1 AND seq <= $2 ORDER BY seq",
        )
        .bind(lo as i64)
        .bind(hi as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(|r| from_json(r.get("record"))).collect()
    }

    async fn events_for_principal(
        &self,
        principal: &PrincipalId,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEvent>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            window.limit as i64
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM caracal_events
             WHERE principal_id = $1
             ORDER BY seq
             OFFSET $2 LIMIT $3
            "#,
        )
        .bind(principal.as_str())
        .bind(window.offset as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(|r| from_json(r.get("record"))).collect()
    }

    async fn unbatched_events(
        &self,
        after_seq: u64,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEvent>> {
        let limit = if limit == 0 { i64::MAX } else { limit as i64 };
        let rows = sqlx::query(
            r#"
            SELECT record FROM caracal_events
             WHERE batch_id IS NULL AND seq > $1
             ORDER BY seq LIMIT $2
            "#,
        )
        .bind(after_seq as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(|r| from_json(r.get("record"))).collect()
    }

    async fn insert_batch(&self, batch: MerkleBatch, member_seqs: &[u64]) -> StoreResult<()> {
        if member_seqs.is_empty() {
            return Err(StoreError::InvalidInput(
                "a batch must contain at least one event".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query(
            "INSERT INTO caracal_batches (id, seq_lo, seq_hi, record) VALUES ($1, $2, $3, $4)",
        )
        .bind(batch.id.as_str())
        .bind(batch.seq_lo as i64)
        .bind(batch.seq_hi as i64)
        .bind(to_json(&batch)?)
        .execute(&mut *tx)
        .await;
        if let Err(e) = result {
            return Err(match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("batch {} already exists", batch.id))
                }
                other => map_sqlx_error(other),
            });
        }

        let seqs: Vec<i64> = member_seqs.iter().map(|s| *s as i64).collect();
        let updated = sqlx::query(
            r#"
            UPDATE caracal_events
               SET batch_id = $1,
                   record = jsonb_set(record, '{batch_id}', to_jsonb($1::text))
             WHERE seq = ANY($2) AND batch_id IS NULL
            "#,
        )
        .bind(batch.id.as_str())
        .bind(&seqs)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() != member_seqs.len() as u64 {
            // Missing or already-sealed member: the whole batch aborts.
            return Err(StoreError::InvariantViolation(format!(
                "batch {} expected {} unbatched members, updated {}",
                batch.id,
                member_seqs.len(),
                updated.rows_affected()
            )));
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<MerkleBatch>> {
        let row = sqlx::query("SELECT record FROM caracal_batches WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn batch_for_seq(&self, seq: u64) -> StoreResult<Option<MerkleBatch>> {
        let row = sqlx::query(
            r#"
            SELECT b.record AS record
              FROM caracal_events e
              JOIN caracal_batches b ON b.id = e.batch_id
             WHERE e.seq = $1
            "#,
        )
        .bind(seq as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }

    async fn events_for_batch(&self, id: &BatchId) -> StoreResult<Vec<LedgerEvent>> {
        let rows =
            sqlx::query("SELECT record FROM caracal_events WHERE batch_id = $1 ORDER BY seq")
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        rows.into_iter().map(|r| from_json(r.get("record"))).collect()
    }

    async fn issuance_event(&self, mandate: &MandateId) -> StoreResult<Option<LedgerEvent>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM caracal_events
             WHERE mandate_id = $1 AND kind = 'issued'
             ORDER BY seq LIMIT 1
            "#,
        )
        .bind(mandate.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(|r| from_json(r.get("record"))).transpose()
    }
}
