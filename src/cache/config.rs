//! Shared cache store configuration.
//!
//! Built from the `[cache]` section of `shopsans.toml`.

use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;

/// URL scheme selecting the process-local backend.
pub const MEMORY_URL: &str = "memory://";

/// Which backend a [`StoreConfig`] resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// No shared store; every operation reports unavailability.
    Disabled,
    /// Process-local map (single-node development, tests).
    Memory,
    /// Redis at the given URL.
    Redis(String),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub target: StoreTarget,
    /// Upper bound for establishing the first connection.
    pub connect_timeout: Duration,
    /// Upper bound for every individual store round trip.
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            target: StoreTarget::Disabled,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            target: StoreTarget::Memory,
            ..Default::default()
        }
    }

    /// Resolve the configured URL; blank or missing disables the store.
    pub fn target_for_url(url: Option<&str>) -> StoreTarget {
        match url.map(str::trim) {
            None | Some("") => StoreTarget::Disabled,
            Some(MEMORY_URL) => StoreTarget::Memory,
            Some(other) => StoreTarget::Redis(other.to_string()),
        }
    }
}

impl From<&crate::config::CacheSettings> for StoreConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            target: Self::target_for_url(settings.url.as_deref()),
            connect_timeout: settings.connect_timeout,
            operation_timeout: settings.operation_timeout,
        }
    }
}
