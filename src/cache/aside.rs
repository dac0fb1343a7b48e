use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::store::SharedStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode payload for caching: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fetch `key` from the shared store, or compute, store for `ttl`, and return it.
///
/// When the store is unavailable `compute` runs on every call and nothing is
/// written. A stored entry that no longer decodes as `T` is treated as a miss
/// and overwritten.
///
/// There is no single-flight: concurrent misses on the same key each run
/// `compute`, and the last write wins. Wrap `compute` yourself if a
/// particular key is too expensive to recompute in parallel.
pub async fn cached<T, E, F, Fut>(
    store: &SharedStore,
    key: &CacheKey,
    ttl: Duration,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let store_available = match store.get(key.as_str()).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                debug!(key = %key, outcome = "hit", "cache-aside");
                return Ok(value);
            }
            Err(error) => {
                warn!(key = %key, error = %error, "discarding undecodable cache entry");
                true
            }
        },
        Ok(None) => true,
        Err(_) => false,
    };

    debug!(key = %key, outcome = "miss", store_available, "cache-aside");
    let value = compute().await?;

    if store_available {
        let encoded = serde_json::to_vec(&value).map_err(CacheError::from)?;
        if store.set_with_ttl(key.as_str(), &encoded, ttl).await.is_err() {
            debug!(key = %key, "cache write skipped; store unavailable");
        }
    }

    Ok(value)
}
