//! Shared cache store handle.
//!
//! [`SharedStore`] is the single boundary between the cache/rate-limit layers
//! and the external key/value store. Construction never touches the network:
//! the first operation connects, and its outcome decides availability. Every
//! failure below this boundary (refused connection, protocol error, timeout)
//! is logged here and surfaces to callers only as [`StoreUnavailable`].
//!
//! Once degraded the handle stays degraded; [`SharedStore::reconnect`] is the
//! hook for a supervisor that wants to try again.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{info, warn};

use super::config::{StoreConfig, StoreTarget};
use super::lock::{rw_read, rw_write};
use super::memory::MemoryBackend;
use super::redis::RedisConnector;

const SOURCE: &str = "cache::store";
const SCAN_BATCH: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("operation timed out")]
    Timeout,
    #[error("command rejected: {0}")]
    Command(String),
    #[error("invalid store configuration: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Connection-class failures take the whole handle down; command errors
    /// only fail the operation that caused them.
    fn degrades_store(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout)
    }
}

/// The only failure callers above the store boundary ever see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("shared cache store unavailable")]
pub struct StoreUnavailable;

/// Raw key/value operations implemented by each backend.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError>;
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;
    /// One cursor step; a returned cursor of `0` ends the iteration.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;
    /// Remaining TTL in seconds; `-1` when the key has no expiry, `-2` when absent.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;
}

/// Establishes a backend connection on first use.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StoreHealth {
    /// No store configured.
    Disabled = 0,
    /// Configured but not contacted yet.
    Pending = 1,
    Connected = 2,
    /// Last contact failed; callers run on their fallbacks.
    Degraded = 3,
}

impl StoreHealth {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StoreHealth::Disabled,
            1 => StoreHealth::Pending,
            2 => StoreHealth::Connected,
            _ => StoreHealth::Degraded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreHealth::Disabled => "disabled",
            StoreHealth::Pending => "pending",
            StoreHealth::Connected => "connected",
            StoreHealth::Degraded => "degraded",
        }
    }
}

/// Process-wide handle to the shared cache store. Cloning is cheap.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    connector: Option<Arc<dyn StoreConnector>>,
    backend: RwLock<Option<Arc<dyn StoreBackend>>>,
    health: AtomicU8,
    connect_gate: AsyncMutex<()>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("health", &self.health())
            .field("operation_timeout", &self.inner.operation_timeout)
            .finish()
    }
}

impl SharedStore {
    /// Build a handle for the configured target without contacting it.
    ///
    /// Fails only when the target itself is malformed (e.g. an unparsable URL).
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let connector: Arc<dyn StoreConnector> = match &config.target {
            StoreTarget::Disabled => return Ok(Self::disabled()),
            StoreTarget::Memory => Arc::new(MemoryBackend::new()),
            StoreTarget::Redis(url) => Arc::new(RedisConnector::open(url)?),
        };
        Ok(Self::new(connector, config))
    }

    pub fn new(connector: Arc<dyn StoreConnector>, config: &StoreConfig) -> Self {
        Self::build(Some(connector), StoreHealth::Pending, config)
    }

    pub fn disabled() -> Self {
        Self::build(None, StoreHealth::Disabled, &StoreConfig::default())
    }

    fn build(
        connector: Option<Arc<dyn StoreConnector>>,
        health: StoreHealth,
        config: &StoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                connector,
                backend: RwLock::new(None),
                health: AtomicU8::new(health as u8),
                connect_gate: AsyncMutex::new(()),
                connect_timeout: config.connect_timeout,
                operation_timeout: config.operation_timeout,
            }),
        }
    }

    pub fn health(&self) -> StoreHealth {
        StoreHealth::from_u8(self.inner.health.load(Ordering::Acquire))
    }

    fn set_health(&self, health: StoreHealth) {
        self.inner.health.store(health as u8, Ordering::Release);
    }

    /// Drop the current connection state and try to connect again.
    pub async fn reconnect(&self) -> StoreHealth {
        if self.inner.connector.is_none() {
            return StoreHealth::Disabled;
        }
        {
            let _gate = self.inner.connect_gate.lock().await;
            *rw_write(&self.inner.backend, SOURCE, "reconnect") = None;
            self.set_health(StoreHealth::Pending);
        }
        let _ = self.connect().await;
        self.health()
    }

    async fn backend(&self) -> Result<Arc<dyn StoreBackend>, StoreUnavailable> {
        match self.health() {
            StoreHealth::Connected => self.current_backend(),
            StoreHealth::Pending => self.connect().await,
            StoreHealth::Disabled | StoreHealth::Degraded => Err(StoreUnavailable),
        }
    }

    fn current_backend(&self) -> Result<Arc<dyn StoreBackend>, StoreUnavailable> {
        rw_read(&self.inner.backend, SOURCE, "backend")
            .clone()
            .ok_or(StoreUnavailable)
    }

    async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreUnavailable> {
        let Some(connector) = self.inner.connector.as_ref() else {
            return Err(StoreUnavailable);
        };

        let _gate = self.inner.connect_gate.lock().await;
        // Another task may have settled the state while this one waited.
        match self.health() {
            StoreHealth::Connected => return self.current_backend(),
            StoreHealth::Disabled | StoreHealth::Degraded => return Err(StoreUnavailable),
            StoreHealth::Pending => {}
        }

        let outcome = match timeout(self.inner.connect_timeout, connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match outcome {
            Ok(backend) => {
                *rw_write(&self.inner.backend, SOURCE, "connect") = Some(Arc::clone(&backend));
                self.set_health(StoreHealth::Connected);
                info!(target: "shopsans::cache::store", "shared cache store connected");
                Ok(backend)
            }
            Err(error) => {
                self.set_health(StoreHealth::Degraded);
                counter!("shopsans_store_degraded_total").increment(1);
                warn!(
                    target: "shopsans::cache::store",
                    op = "connect",
                    error = %error,
                    "shared cache store unreachable; continuing without it"
                );
                Err(StoreUnavailable)
            }
        }
    }

    fn mark_degraded(&self, op: &'static str, error: &StoreError) {
        let previous = self
            .inner
            .health
            .swap(StoreHealth::Degraded as u8, Ordering::AcqRel);
        if StoreHealth::from_u8(previous) != StoreHealth::Degraded {
            *rw_write(&self.inner.backend, SOURCE, "mark_degraded") = None;
            counter!("shopsans_store_degraded_total").increment(1);
            warn!(
                target: "shopsans::cache::store",
                op,
                error = %error,
                "shared cache store degraded; callers fall back"
            );
        }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, StoreUnavailable>
    where
        F: FnOnce(Arc<dyn StoreBackend>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let backend = self.backend().await?;
        let outcome = match timeout(self.inner.operation_timeout, call(backend)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        outcome.map_err(|error| {
            if error.degrades_store() {
                self.mark_degraded(op, &error);
            } else {
                warn!(
                    target: "shopsans::cache::store",
                    op,
                    error = %error,
                    "shared cache store rejected command"
                );
            }
            StoreUnavailable
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreUnavailable> {
        self.run("get", |backend| async move { backend.get(key).await })
            .await
            .map(|value| value.map(Bytes::from))
    }

    /// Store `value` under `key`, replacing any previous entry. TTLs below one second round up.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreUnavailable> {
        let ttl_secs = whole_seconds(ttl);
        self.run("set", |backend| async move {
            backend.set_ex(key, value, ttl_secs).await
        })
        .await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<u64, StoreUnavailable> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run("delete", |backend| async move { backend.del(keys).await })
            .await
    }

    /// Every key starting with `prefix`, enumerated with cursor iteration.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreUnavailable> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor = 0_u64;
        let mut keys = Vec::new();

        loop {
            let pattern = pattern.as_str();
            let (next, batch) = self
                .run("scan", |backend| async move {
                    backend.scan(cursor, pattern, SCAN_BATCH).await
                })
                .await?;
            keys.extend(batch.into_iter().filter(|key| key.starts_with(prefix)));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    pub async fn ping(&self) -> Result<(), StoreUnavailable> {
        self.run("ping", |backend| async move { backend.ping().await })
            .await
    }

    /// Atomically increment the counter at `key`, creating it at 1.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreUnavailable> {
        self.run("incr", |backend| async move { backend.incr(key).await })
            .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreUnavailable> {
        let ttl_secs = whole_seconds(ttl);
        self.run("expire", |backend| async move {
            backend.expire(key, ttl_secs).await
        })
        .await
    }

    pub async fn ttl(&self, key: &str) -> Result<i64, StoreUnavailable> {
        self.run("ttl", |backend| async move { backend.ttl(key).await })
            .await
    }

    /// Delete every key under `prefix`, returning how many were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, StoreUnavailable> {
        let keys = self.scan_prefix(prefix).await?;
        self.delete(&keys).await
    }
}

fn whole_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

/// Escape glob metacharacters so a literal prefix can be used in a MATCH pattern.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct RefusingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl StoreConnector for RefusingConnector {
        async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Connection("connection refused".to_string()))
        }
    }

    struct StalledConnector;

    #[async_trait]
    impl StoreConnector for StalledConnector {
        async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
            std::future::pending().await
        }
    }

    fn memory_store() -> SharedStore {
        SharedStore::from_config(&StoreConfig::memory()).expect("memory store")
    }

    #[tokio::test]
    async fn disabled_store_is_always_unavailable() {
        let store = SharedStore::disabled();
        assert_eq!(store.health(), StoreHealth::Disabled);
        assert_eq!(store.get("k").await, Err(StoreUnavailable));
        assert_eq!(store.ping().await, Err(StoreUnavailable));
        assert_eq!(store.reconnect().await, StoreHealth::Disabled);
    }

    #[tokio::test]
    async fn construction_is_lazy_and_first_use_connects() {
        let store = memory_store();
        assert_eq!(store.health(), StoreHealth::Pending);

        store
            .set_with_ttl("k", b"v", Duration::from_secs(5))
            .await
            .expect("set");
        assert_eq!(store.health(), StoreHealth::Connected);
        assert_eq!(
            store.get("k").await.expect("get"),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn failed_connect_degrades_without_retrying() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
        });
        let store = SharedStore::new(connector.clone(), &StoreConfig::default());

        assert_eq!(store.get("k").await, Err(StoreUnavailable));
        assert_eq!(store.get("k").await, Err(StoreUnavailable));
        assert_eq!(store.health(), StoreHealth::Degraded);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        assert_eq!(store.reconnect().await, StoreHealth::Degraded);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_unavailable() {
        let store = SharedStore::new(Arc::new(StalledConnector), &StoreConfig::default());
        assert_eq!(store.ping().await, Err(StoreUnavailable));
        assert_eq!(store.health(), StoreHealth::Degraded);
    }

    #[tokio::test]
    async fn command_errors_do_not_degrade_the_store() {
        let store = memory_store();
        store
            .set_with_ttl("text", b"not a number", Duration::from_secs(5))
            .await
            .expect("set");

        assert_eq!(store.incr("text").await, Err(StoreUnavailable));
        assert_eq!(store.health(), StoreHealth::Connected);
        assert_eq!(store.incr("counter").await, Ok(1));
    }

    #[tokio::test]
    async fn scan_prefix_enumerates_across_cursor_pages() {
        let store = memory_store();
        for i in 0..450 {
            store
                .set_with_ttl(&format!("overview:{i}"), b"1", Duration::from_secs(60))
                .await
                .expect("set");
        }
        store
            .set_with_ttl("other:1", b"1", Duration::from_secs(60))
            .await
            .expect("set");

        let keys = store.scan_prefix("overview:").await.expect("scan");
        assert_eq!(keys.len(), 450);
        assert!(keys.iter().all(|key| key.starts_with("overview:")));

        assert_eq!(store.invalidate_prefix("overview:").await, Ok(450));
        assert_eq!(store.get("overview:7").await, Ok(None));
        assert!(store.get("other:1").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_without_keys_skips_the_store() {
        let store = SharedStore::disabled();
        assert_eq!(store.delete(&[]).await, Ok(0));
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
        assert_eq!(escape_glob("plain:"), "plain:");
    }

    #[test]
    fn sub_second_ttls_round_up() {
        assert_eq!(whole_seconds(Duration::from_millis(1)), 1);
        assert_eq!(whole_seconds(Duration::ZERO), 1);
        assert_eq!(whole_seconds(Duration::from_millis(2_100)), 3);
        assert_eq!(whole_seconds(Duration::from_secs(60)), 60);
    }
}
