//! In-process key-value store
//!
//! Mirrors the Redis semantics the auth core relies on (TTL expiry, atomic
//! `INCR`, `SET NX`) for tests and single-node development. Expired entries
//! are treated as absent, pruned on access, and swept from the whole map
//! every [`SWEEP_EVERY`] writes so keys that are never read again do not pile up.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{Clock, DbError, DbResult, KeyValueStore, SystemClock};

/// Writes between full sweeps of expired entries
pub const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// [`KeyValueStore`] held in a concurrent map
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
    writes: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            writes: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Must be called with no map guard held
    fn record_write(&self) {
        let count = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SWEEP_EVERY == 0 {
            let removed = self.purge_expired();
            tracing::trace!(removed, "Swept expired in-memory keys");
        }
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now() + ttl.as_secs().max(1) as i64
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let now = self.clock.now();
        let live = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());

        if live.is_none() {
            self.entries.remove_if(key, |_, v| !v.is_live(now));
        }
        Ok(live)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        let expires_at = Some(self.expiry(ttl));
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        self.record_write();
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool> {
        let now = self.clock.now();
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at: Some(self.expiry(ttl)),
        };

        let claimed = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(fresh);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        if claimed {
            self.record_write();
        }
        Ok(claimed)
    }

    async fn incr(&self, key: &str) -> DbResult<i64> {
        let now = self.clock.now();

        let next = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let current: i64 = occupied.get().value.parse().map_err(|_| {
                    DbError::Redis("value is not an integer or out of range".to_string())
                })?;
                let next = current + 1;
                occupied.get_mut().value = next.to_string();
                next
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(StoredValue {
                    value: "1".to_string(),
                    expires_at: None,
                });
                1
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    value: "1".to_string(),
                    expires_at: None,
                });
                1
            }
        };

        self.record_write();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> DbResult<bool> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);

        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> DbResult<Option<u64>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| (at - now) as u64))
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, v)| v.is_live(now)))
    }
}
