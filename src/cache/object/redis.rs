use crate::cache::CachedObject;

use crate::cache::{CacheError, CacheResult};
use redis::{AsyncCommands, Client};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Redis cache with a single reusable multiplexed connection
#[derive(Clone)]
pub struct RedisCache<T> {
    client: Client,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
    key_prefix: String,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> RedisCache<T> {
    pub fn new(redis_url: &str, key_prefix: String) -> CacheResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Cache(format!("Redis client error: {}", e)))?;

        Ok(Self::from_client(client, key_prefix))
    }

    pub fn from_client(client: Client, key_prefix: String) -> Self {
        Self {
            client,
            connection: Arc::new(Mutex::new(None)),
            key_prefix,
            _phantom: std::marker::PhantomData,
        }
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(conn) = conn_guard.take() {
            if self.test_connection(&conn).await.is_ok() {
                return Ok(conn);
            }
        }

        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CacheError::Connection(format!("Connection failed: {}", e)))
    }

    async fn test_connection(
        &self,
        conn: &redis::aio::MultiplexedConnection,
    ) -> Result<(), redis::RedisError> {
        let mut conn = conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn return_connection(&self, conn: redis::aio::MultiplexedConnection) {
        *self.connection.lock().await = Some(conn);
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub async fn health_check(&self) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Cache(format!("Ping failed: {}", e)))?;

        self.return_connection(conn).await;
        Ok(())
    }
}

impl<T> RedisCache<T>
where
    T: CachedObject,
{
    fn decode(data: Option<Vec<u8>>) -> CacheResult<Option<T>> {
        match data {
            Some(data) => postcard::from_bytes(&data)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let key = self.prefixed_key(key);
        let mut conn = self.get_connection().await?;

        let result: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .map_err(|e| CacheError::Cache(e.to_string()))?;

        self.return_connection(conn).await;
        Self::decode(result)
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.prefixed_key(key);
        let data =
            postcard::to_allocvec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.get_connection().await?;

        if let Some(ttl) = ttl {
            // SET EX rejects a zero expiry
            let _: () = conn
                .set_ex(&key, &data, ttl.as_secs().max(1))
                .await
                .map_err(|e| CacheError::Cache(e.to_string()))?;
        } else {
            let _: () = conn
                .set(&key, &data)
                .await
                .map_err(|e| CacheError::Cache(e.to_string()))?;
        }

        self.return_connection(conn).await;
        Ok(())
    }

    /// `GETDEL`: the server guarantees a single winner among concurrent takers.
    pub async fn take(&self, key: &str) -> CacheResult<Option<T>> {
        let key = self.prefixed_key(key);
        let mut conn = self.get_connection().await?;

        let result: Option<Vec<u8>> = conn
            .get_del(&key)
            .await
            .map_err(|e| CacheError::Cache(e.to_string()))?;

        self.return_connection(conn).await;
        Self::decode(result)
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.prefixed_key(key);
        let mut conn = self.get_connection().await?;

        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| CacheError::Cache(e.to_string()))?;

        self.return_connection(conn).await;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.prefixed_key(key);
        let mut conn = self.get_connection().await?;

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| CacheError::Cache(e.to_string()))?;

        self.return_connection(conn).await;
        Ok(exists)
    }
}
