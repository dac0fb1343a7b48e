//! Process-local store backend.
//!
//! Mirrors the subset of Redis semantics the cache and rate limiter rely on,
//! so single-node deployments and tests exercise the same code paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use super::lock::mutex_lock;
use super::store::{StoreBackend, StoreConnector, StoreError};

const SOURCE: &str = "cache::memory";

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, MemoryEntry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut MemoryEntry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        Ok(live_entry(&mut entries, key, Instant::now()).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        mutex_lock(&self.entries, SOURCE, "set_ex").insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "del");
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        let now = Instant::now();
        let mut matching: Vec<String> = mutex_lock(&self.entries, SOURCE, "scan")
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matching.sort_unstable();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let count = count.max(1);
        let batch: Vec<String> = matching.iter().skip(start).take(count).cloned().collect();
        let end = start.saturating_add(count);
        let next = if end < matching.len() { end as u64 } else { 0 };
        Ok((next, batch))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "incr");
        match live_entry(&mut entries, key, Instant::now()) {
            Some(entry) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok())
                    .ok_or_else(|| {
                        StoreError::Command("value is not an integer or out of range".to_string())
                    })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    StoreError::Command("increment or decrement would overflow".to_string())
                })?;
                entry.value = next.to_string().into_bytes();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: b"1".to_vec(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "expire");
        if let Some(entry) = live_entry(&mut entries, key, now) {
            entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "ttl");
        let Some(entry) = live_entry(&mut entries, key, now) else {
            return Ok(-2);
        };
        let Some(expires_at) = entry.expires_at else {
            return Ok(-1);
        };
        let remaining_ms = expires_at.saturating_duration_since(now).as_millis();
        Ok(i64::try_from(remaining_ms.div_ceil(1_000)).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl StoreConnector for MemoryBackend {
    async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
        Ok(Arc::new(self.clone()))
    }
}

/// Redis-style glob: `*`, `?`, and backslash escapes.
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    glob_at(&pattern, &candidate)
}

fn glob_at(pattern: &[char], candidate: &[char]) -> bool {
    match pattern.split_first() {
        None => candidate.is_empty(),
        Some(('*', rest)) => (0..=candidate.len()).any(|skip| glob_at(rest, &candidate[skip..])),
        Some(('?', rest)) => !candidate.is_empty() && glob_at(rest, &candidate[1..]),
        Some(('\\', rest)) if !rest.is_empty() => {
            candidate.first() == Some(&rest[0]) && glob_at(&rest[1..], &candidate[1..])
        }
        Some((ch, rest)) => candidate.first() == Some(ch) && glob_at(rest, &candidate[1..]),
    }
}
