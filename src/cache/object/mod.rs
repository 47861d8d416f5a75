//! Typed cache with per-type key namespaces.
//!
//! Every cached type gets its own `{TypeName}:{structural_hash}:` prefix, so a lookup
//! can only ever miss or return a value of the requested type.
pub mod memory;
pub mod redis;
use crate::cache::CacheResult;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::marker::PhantomData;
use std::time::Duration;
pub use typed_cache_macro::typed_cache;

#[derive(Clone)]
pub enum TypedCacheBackend<T> {
    Memory(memory::MemoryCache<T>),
    Redis(redis::RedisCache<T>),
}

/// Implemented by `#[typed_cache]`.
pub trait CachedObject:
    Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static
{
    fn default_ttl() -> Option<Duration> {
        None
    }

    fn cache_prefix() -> &'static str;

    /// Hash of the type's name and field layout; changes whenever the struct does.
    fn cache_type_hash() -> u64;
}

#[derive(Clone)]
pub struct TypedCache<T: CachedObject> {
    backend: TypedCacheBackend<T>,
    prefix: &'static str,
    type_hash: u64,
    default_ttl: Option<Duration>,
    _phantom: PhantomData<T>,
}

impl<T: CachedObject> TypedCache<T> {
    pub(crate) fn new(backend: TypedCacheBackend<T>) -> Self {
        Self {
            backend,
            prefix: T::cache_prefix(),
            type_hash: T::cache_type_hash(),
            default_ttl: T::default_ttl(),
            _phantom: PhantomData,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.type_hash, key)
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let cache_key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.get(&cache_key).await,
            TypedCacheBackend::Redis(cache) => cache.get(&cache_key).await,
        }
    }

    /// Set value with an explicit TTL, falling back to the type's default
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let cache_key = self.cache_key(key);
        let ttl = ttl.or(self.default_ttl);

        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.set(&cache_key, value, ttl).await,
            TypedCacheBackend::Redis(cache) => cache.set(&cache_key, value, ttl).await,
        }
    }

    pub async fn set(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with_ttl(key, value, None).await
    }

    /// Atomic get-and-delete.
    pub async fn take(&self, key: &str) -> CacheResult<Option<T>> {
        let cache_key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.take(&cache_key).await,
            TypedCacheBackend::Redis(cache) => cache.take(&cache_key).await,
        }
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let cache_key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.delete(&cache_key).await,
            TypedCacheBackend::Redis(cache) => cache.delete(&cache_key).await,
        }
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let cache_key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.exists(&cache_key).await,
            TypedCacheBackend::Redis(cache) => cache.exists(&cache_key).await,
        }
    }

    pub fn get_stats(&self) -> TypedCacheStats {
        TypedCacheStats {
            type_name: type_name::<T>(),
            type_hash: self.type_hash,
            prefix: self.prefix.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedCacheStats {
    pub type_name: &'static str,
    pub type_hash: u64,
    pub prefix: String,
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryCache, MemoryStore};
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[typed_cache(ttl = 300)]
    struct TestSession {
        challenge: String,
        user_id: Option<i32>,
    }

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[typed_cache(ttl = 600)]
    struct TestKeySet {
        kids: Vec<String>,
    }

    #[tokio::test]
    async fn test_types_share_store_without_colliding() {
        let store = MemoryStore::default();
        let sessions =
            TypedCache::<TestSession>::new(TypedCacheBackend::Memory(MemoryCache::from_shared_store(
                store.clone(),
            )));
        let key_sets =
            TypedCache::<TestKeySet>::new(TypedCacheBackend::Memory(MemoryCache::from_shared_store(
                store.clone(),
            )));

        let session = TestSession {
            challenge: "abc".to_string(),
            user_id: Some(7),
        };
        let key_set = TestKeySet {
            kids: vec!["k1".to_string()],
        };

        sessions.set("1", &session).await.unwrap();
        key_sets.set("1", &key_set).await.unwrap();

        assert_eq!(sessions.get("1").await.unwrap(), Some(session));
        assert_eq!(key_sets.get("1").await.unwrap(), Some(key_set));
        assert_eq!(store.len(), 2);
        assert_ne!(sessions.cache_key("1"), key_sets.cache_key("1"));
    }

    #[tokio::test]
    async fn test_take_through_typed_cache() {
        let cache = TypedCache::<TestSession>::new(TypedCacheBackend::Memory(MemoryCache::new()));
        let session = TestSession {
            challenge: "abc".to_string(),
            user_id: None,
        };

        cache.set("reg:n1", &session).await.unwrap();
        assert!(cache.exists("reg:n1").await.unwrap());
        assert_eq!(cache.take("reg:n1").await.unwrap(), Some(session));
        assert!(!cache.exists("reg:n1").await.unwrap());
        assert_eq!(cache.take("reg:n1").await.unwrap(), None);
    }

    #[test]
    fn test_structural_hashing() {
        #[derive(Serialize, Deserialize, Clone)]
        #[typed_cache]
        struct SessionV1 {
            challenge: String,
        }

        #[derive(Serialize, Deserialize, Clone)]
        #[typed_cache]
        struct SessionV2 {
            challenge: String,
            origin: String,
        }

        assert_ne!(SessionV1::cache_type_hash(), SessionV2::cache_type_hash());
        assert_eq!(SessionV1::default_ttl(), None);
        assert_eq!(TestSession::default_ttl(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_stats_prefix() {
        let cache = TypedCache::<TestSession>::new(TypedCacheBackend::Memory(MemoryCache::new()));
        assert_eq!(cache.get_stats().prefix, "TestSession");
    }
}
