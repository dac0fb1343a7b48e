//! Shopsans cache layer.
//!
//! - [`SharedStore`]: lazily connected handle to the shared key/value store
//!   (Redis, or a process-local map), degrading to "unavailable" instead of
//!   failing callers
//! - [`cached`]: cache-aside for values inside the application
//! - [`respond_with_cache`]: conditional-GET JSON responses with strong ETags
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! url = "redis://127.0.0.1:6379/0"   # or "memory://", or unset to disable
//! connect_timeout_ms = 1000
//! operation_timeout_ms = 250
//! ```

mod aside;
mod conditional;
mod config;
mod keys;
mod lock;
mod memory;
mod redis;
mod store;

pub use aside::{CacheError, cached};
pub use conditional::{
    CacheStatus, ConditionalRequest, X_CACHE, X_NO_CACHE, respond_with_cache, strong_etag,
};
pub use self::config::{MEMORY_URL, StoreConfig, StoreTarget};
pub use keys::CacheKey;
pub use memory::MemoryBackend;
pub use self::redis::{RedisBackend, RedisConnector};
pub use store::{
    SharedStore, StoreBackend, StoreConnector, StoreError, StoreHealth, StoreUnavailable,
};
