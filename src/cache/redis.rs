//! Redis-backed store.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};

use super::store::{StoreBackend, StoreConnector, StoreError};

/// Holds a parsed client; no connection is made until [`StoreConnector::connect`].
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        redis::Client::open(url)
            .map(|client| Self { client })
            .map_err(|err| StoreError::Configuration(err.to_string()))
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Arc::new(RedisBackend { conn }))
    }
}

/// A multiplexed connection shared by every request; clones are cheap.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_redis_error)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs)
            .await
            .map_err(map_redis_error)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(map_redis_error)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        let mut conn = self.conn.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(page)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1_i64).await.map_err(map_redis_error)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let _: bool = conn.expire(key, seconds).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.ttl(key).await.map_err(map_redis_error)
    }
}
