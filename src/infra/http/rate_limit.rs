//! Fixed-window request limiter.
//!
//! Counters live in the shared store so every replica sees the same budget.
//! When the store cannot be reached the limiter answers from a per-process
//! window map instead; a single check never mixes the two.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{SharedStore, StoreUnavailable};
use crate::config::RateLimitSettings;

use super::error::ApiError;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Route-class prefix, e.g. `rl:search`.
    pub key_prefix: String,
    pub limit: NonZeroU32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(key_prefix: impl Into<String>, limit: NonZeroU32, window: Duration) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            limit,
            window,
        }
    }

    pub fn search() -> Self {
        Self::new(
            "rl:search",
            NonZeroU32::new(180).unwrap_or(NonZeroU32::MIN),
            Duration::from_secs(60),
        )
    }

    pub fn analytics() -> Self {
        Self::new(
            "rl:analytics",
            NonZeroU32::new(120).unwrap_or(NonZeroU32::MIN),
            Duration::from_secs(60),
        )
    }

    pub fn from_settings(key_prefix: impl Into<String>, settings: &RateLimitSettings) -> Self {
        Self::new(
            key_prefix,
            settings.max_requests,
            Duration::from_secs(u64::from(settings.window_seconds.get())),
        )
    }

    fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    fn key_for(&self, identity: &str) -> String {
        format!("{}:{identity}", self.key_prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateBackend {
    Store,
    Memory,
}

/// Budget state reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_secs: u64,
    pub backend: RateBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow(RateStatus),
    Deny { status: RateStatus, retry_after: u64 },
}

impl RateDecision {
    pub fn status(&self) -> RateStatus {
        match self {
            RateDecision::Allow(status) | RateDecision::Deny { status, .. } => *status,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: SharedStore,
    local: DashMap<String, LocalWindow>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, store: SharedStore) -> Self {
        Self {
            policy,
            store,
            local: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request from `identity` against the current window.
    pub async fn check(&self, identity: &str) -> RateDecision {
        let key = self.policy.key_for(identity);
        match self.check_store(&key).await {
            Ok(decision) => decision,
            Err(StoreUnavailable) => {
                counter!(
                    "shopsans_rate_limit_fallback_total",
                    "scope" => self.policy.key_prefix.clone()
                )
                .increment(1);
                self.check_local(key)
            }
        }
    }

    async fn check_store(&self, key: &str) -> Result<RateDecision, StoreUnavailable> {
        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, self.policy.window).await?;
        }

        let reset_secs = match self.store.ttl(key).await {
            Ok(ttl) if ttl > 0 => ttl.unsigned_abs(),
            Ok(-1) => {
                // Counter survived without an expiry; arm it so the window can end.
                debug!(key, "re-arming rate limit window without expiry");
                if self.store.expire(key, self.policy.window).await.is_err() {
                    warn!(key, "failed to re-arm rate limit window");
                }
                self.policy.window_secs()
            }
            _ => self.policy.window_secs(),
        };

        let count = u64::try_from(count).unwrap_or(0);
        Ok(self.decide(count, reset_secs, RateBackend::Store))
    }

    fn check_local(&self, key: String) -> RateDecision {
        let now = Instant::now();
        let window = self.policy.window;

        let snapshot = {
            let mut entry = self.local.entry(key).or_insert(LocalWindow {
                count: 0,
                reset_at: now + window,
            });
            if entry.count == 0 || now > entry.reset_at {
                *entry = LocalWindow {
                    count: 1,
                    reset_at: now + window,
                };
            } else {
                entry.count = entry.count.saturating_add(1);
            }
            *entry
        };

        let remaining = snapshot.reset_at.saturating_duration_since(now);
        let reset_secs = ceil_secs(remaining);
        self.decide(u64::from(snapshot.count), reset_secs, RateBackend::Memory)
    }

    fn decide(&self, count: u64, reset_secs: u64, backend: RateBackend) -> RateDecision {
        let limit = self.policy.limit.get();
        let remaining = u64::from(limit).saturating_sub(count);
        let status = RateStatus {
            limit,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_secs,
            backend,
        };

        if count > u64::from(limit) {
            RateDecision::Deny {
                status,
                retry_after: reset_secs,
            }
        } else {
            RateDecision::Allow(status)
        }
    }

    /// Drop fallback windows that have already ended.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, window| window.reset_at >= now);
        before.saturating_sub(self.local.len())
    }

    pub fn local_windows(&self) -> usize {
        self.local.len()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    let secs = if duration.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

/// Peer address when known, else the first `X-Forwarded-For` hop.
pub fn client_identity(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(peer, request.headers());

    let decision = limiter.check(&identity).await;
    let status = decision.status();

    let mut response = match decision {
        RateDecision::Allow(_) => next.run(request).await,
        RateDecision::Deny { retry_after, .. } => {
            counter!(
                "shopsans_rate_limit_rejected_total",
                "scope" => limiter.policy().key_prefix.clone()
            )
            .increment(1);
            debug!(
                scope = %limiter.policy().key_prefix,
                identity = %identity,
                retry_after,
                "rate limit exceeded"
            );
            ApiError::rate_limited(retry_after)
        }
    };

    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_secs));
    response
}
