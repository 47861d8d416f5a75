//! Short-lived shared state: passkey ceremony sessions.
//!
//! Backed by process memory for a single instance or Redis when several instances
//! must see the same sessions.

use thiserror::Error;

pub mod config;
pub mod object;

pub use object::{typed_cache, CachedObject, TypedCache, TypedCacheStats};

use crate::cache::config::CacheConfig;
use crate::cache::object::memory::MemoryStore;
use crate::cache::object::TypedCacheBackend;
use crate::clock::{system_clock, SharedClock};
use crate::health::{HealthCheckResult, HealthChecker};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

enum Backend {
    Memory(MemoryStore),
    Redis(redis::Client),
}

/// Hands out `TypedCache<T>` views over one shared backend.
#[derive(Clone)]
pub struct CacheManager {
    config: CacheConfig,
    backend: std::sync::Arc<Backend>,
}

impl CacheManager {
    /// Memory backend with the wall clock
    pub fn new_memory() -> Self {
        Self::new_memory_with_clock(system_clock())
    }

    /// Memory backend whose expiry follows `clock`
    pub fn new_memory_with_clock(clock: SharedClock) -> Self {
        Self {
            config: CacheConfig {
                backend: "memory".to_string(),
                ..Default::default()
            },
            backend: std::sync::Arc::new(Backend::Memory(MemoryStore::new(clock))),
        }
    }

    pub async fn new_from_config(config: &CacheConfig, clock: SharedClock) -> CacheResult<Self> {
        let backend = match config.backend.as_str() {
            "redis" => {
                let client = redis::Client::open(config.redis_url.as_str()).map_err(|e| {
                    CacheError::Connection(format!("Redis client creation failed: {}", e))
                })?;

                // Fail at startup rather than on the first ceremony
                let mut conn = client
                    .get_multiplexed_tokio_connection()
                    .await
                    .map_err(|e| CacheError::Connection(format!("Redis connection failed: {}", e)))?;
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map_err(|e| CacheError::Connection(format!("Redis ping failed: {}", e)))?;

                Backend::Redis(client)
            }
            "memory" => Backend::Memory(MemoryStore::new(clock)),
            other => {
                return Err(CacheError::Cache(format!(
                    "unknown cache backend '{}', expected 'memory' or 'redis'",
                    other
                )))
            }
        };

        tracing::info!(backend = %config.backend, "cache initialized");

        Ok(Self {
            config: config.clone(),
            backend: std::sync::Arc::new(backend),
        })
    }

    pub fn cache<T: CachedObject>(&self) -> TypedCache<T> {
        let backend = match self.backend.as_ref() {
            Backend::Redis(client) => TypedCacheBackend::Redis(object::redis::RedisCache::from_client(
                client.clone(),
                self.config.redis_key_prefix.clone(),
            )),
            Backend::Memory(store) => TypedCacheBackend::Memory(
                object::memory::MemoryCache::from_shared_store(store.clone()),
            ),
        };
        TypedCache::new(backend)
    }

    /// Reclaim memory held by expired entries; a no-op for Redis, which expires keys itself.
    pub fn purge_expired(&self) {
        if let Backend::Memory(store) = self.backend.as_ref() {
            store.purge_expired();
        }
    }

    pub fn backend_type(&self) -> &str {
        &self.config.backend
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        match self.backend.as_ref() {
            Backend::Redis(client) => {
                let redis_cache = object::redis::RedisCache::<()>::from_client(
                    client.clone(),
                    self.config.redis_key_prefix.clone(),
                );
                match redis_cache.health_check().await {
                    Ok(_) => HealthCheckResult::healthy_with_details(serde_json::json!({
                        "backend": "redis",
                        "connection": "ok"
                    })),
                    Err(err) => HealthCheckResult::unhealthy_with_details(
                        "Redis health check failed".to_string(),
                        serde_json::json!({
                            "backend": "redis",
                            "error": err.to_string()
                        }),
                    ),
                }
            }
            Backend::Memory(store) => HealthCheckResult::healthy_with_details(serde_json::json!({
                "backend": "memory",
                "entries": store.len()
            })),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new_memory()
    }
}

#[async_trait::async_trait]
impl HealthChecker for CacheManager {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> HealthCheckResult {
        self.health_check().await
    }
}
