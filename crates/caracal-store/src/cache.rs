use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use caracal_types::{AuthorityPolicy, PrincipalId};

use crate::traits::PolicyStore;
use crate::{StoreError, StoreResult};

const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    policy: AuthorityPolicy,
    cached_at: Instant,
}

/// Read-through cache over current policies, keyed by principal.
///
/// Entries live for a short TTL and are additionally invalidated by
/// version-bump notifications from the store. The TTL also bounds how
/// stale a degraded-mode read may be.
pub struct PolicyCache {
    ttl: Duration,
    entries: RwLock<HashMap<PrincipalId, CacheEntry>>,
}

impl PolicyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    /// Current policy for a principal, served from cache when fresh.
    pub async fn current_policy<S: PolicyStore + ?Sized>(
        &self,
        store: &S,
        principal: &PrincipalId,
    ) -> StoreResult<Option<AuthorityPolicy>> {
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| StoreError::Backend("policy cache lock poisoned".to_string()))?;
            if let Some(entry) = entries.get(principal) {
                if entry.cached_at.elapsed() < self.ttl {
                    return Ok(Some(entry.policy.clone()));
                }
            }
        }

        let loaded = store.current_policy(principal).await?;
        if let Some(policy) = &loaded {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| StoreError::Backend("policy cache lock poisoned".to_string()))?;
            entries.insert(
                principal.clone(),
                CacheEntry {
                    policy: policy.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(loaded)
    }

    pub fn invalidate(&self, principal: &PrincipalId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(principal);
        }
    }

    /// Drain version-bump notifications into invalidations until the
    /// sender side closes.
    pub async fn run_invalidation_listener(&self, mut bumps: broadcast::Receiver<PrincipalId>) {
        loop {
            match bumps.recv().await {
                Ok(principal) => {
                    debug!(%principal, "policy version bump, invalidating cache entry");
                    self.invalidate(&principal);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed bumps: drop everything rather than serve stale.
                    debug!(skipped, "policy bump stream lagged, clearing cache");
                    if let Ok(mut entries) = self.entries.write() {
                        entries.clear();
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
