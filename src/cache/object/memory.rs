use crate::cache::{CacheError, CacheResult, CachedObject};
use crate::clock::{system_clock, SharedClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
struct TtlEntry {
    data: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl TtlEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-wide byte store shared by every `MemoryCache<T>` a manager hands out.
///
/// Values are postcard-encoded exactly as the Redis backend stores them, so both
/// backends see the same serialization failures.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, TtlEntry>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. Reads already ignore them; this only reclaims memory.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

#[derive(Clone)]
pub struct MemoryCache<T> {
    store: MemoryStore,
    _phantom: PhantomData<T>,
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self::from_shared_store(MemoryStore::default())
    }

    pub fn from_shared_store(store: MemoryStore) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CachedObject> MemoryCache<T> {
    fn decode(data: &[u8]) -> CacheResult<T> {
        postcard::from_bytes(data).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let now = self.store.clock.now();
        let data = match self.store.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.data.clone()),
            _ => None,
        };

        match data {
            Some(data) => Ok(Some(Self::decode(&data)?)),
            None => {
                self.store
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let data =
            postcard::to_allocvec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| CacheError::Cache(format!("TTL out of range: {}", e)))?;
                Some(self.store.clock.now() + ttl)
            }
            None => None,
        };

        self.store
            .entries
            .insert(key.to_string(), TtlEntry { data, expires_at });
        Ok(())
    }

    /// Remove and return the value in one step; of any number of concurrent callers
    /// at most one observes `Some`.
    pub async fn take(&self, key: &str) -> CacheResult<Option<T>> {
        let now = self.store.clock.now();
        match self.store.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => Ok(Some(Self::decode(&entry.data)?)),
            _ => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.entries.remove(key);
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = self.store.clock.now();
        Ok(self
            .store
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }
}
