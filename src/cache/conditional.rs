//! Conditional-GET response cache.
//!
//! Serves JSON payloads out of the shared store with a strong content ETag,
//! answering `If-None-Match` with `304 Not Modified`. The ETag is always the
//! hash of the exact bytes placed in the response body.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
        request::Parts,
    },
    response::Response,
};
use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::aside::CacheError;
use super::keys::CacheKey;
use super::store::SharedStore;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_NO_CACHE: HeaderName = HeaderName::from_static("x-no-cache");
const BYPASS_QUERY_FLAG: &str = "nocache";
const BYPASS_VALUE: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// The parts of an inbound request that steer the response cache.
#[derive(Debug, Clone, Default)]
pub struct ConditionalRequest {
    /// Caller asked to skip the cache for both read and write.
    pub bypass: bool,
    pub if_none_match: Option<HeaderValue>,
}

impl ConditionalRequest {
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            bypass: bypass_requested(parts.uri.query(), &parts.headers),
            if_none_match: parts.headers.get(IF_NONE_MATCH).cloned(),
        }
    }
}

impl<S> FromRequestParts<S> for ConditionalRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

fn bypass_requested(query: Option<&str>, headers: &HeaderMap) -> bool {
    let by_header = headers
        .get(&X_NO_CACHE)
        .is_some_and(|value| value.as_bytes() == BYPASS_VALUE.as_bytes());
    let by_query = query.is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .any(|(name, value)| name == BYPASS_QUERY_FLAG && value == BYPASS_VALUE)
    });
    by_header || by_query
}

/// Quoted lowercase hex SHA-256 of `body`.
pub fn strong_etag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Serve `key` from the shared store, or compute, serialize and store it.
///
/// Store failures never fail the response; they only turn hits into misses.
/// Encoding failures of the computed value propagate as
/// [`CacheError::Serialization`].
pub async fn respond_with_cache<T, E, F, Fut>(
    store: &SharedStore,
    request: &ConditionalRequest,
    key: &CacheKey,
    ttl: Duration,
    compute: F,
) -> Result<Response, E>
where
    T: Serialize,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut store_available = true;

    if request.bypass {
        counter!("shopsans_cache_bypass_total").increment(1);
    } else {
        match store.get(key.as_str()).await {
            Ok(Some(body)) => {
                counter!("shopsans_cache_hit_total").increment(1);
                return Ok(hit_response(request, body, ttl));
            }
            Ok(None) => {}
            Err(_) => store_available = false,
        }
    }

    counter!("shopsans_cache_miss_total").increment(1);
    let value = compute().await?;
    let body = Bytes::from(serde_json::to_vec(&value).map_err(CacheError::from)?);
    let etag = strong_etag(&body);

    if !request.bypass && store_available {
        if store.set_with_ttl(key.as_str(), &body, ttl).await.is_err() {
            debug!(key = %key, "response not cached; store unavailable");
        }
    }

    Ok(build_response(
        StatusCode::OK,
        &etag,
        ttl,
        CacheStatus::Miss,
        body,
    ))
}

fn hit_response(request: &ConditionalRequest, body: Bytes, ttl: Duration) -> Response {
    let etag = strong_etag(&body);
    let matches = request
        .if_none_match
        .as_ref()
        .is_some_and(|presented| presented.as_bytes() == etag.as_bytes());

    if matches {
        counter!("shopsans_cache_not_modified_total").increment(1);
        return build_response(
            StatusCode::NOT_MODIFIED,
            &etag,
            ttl,
            CacheStatus::Hit,
            Bytes::new(),
        );
    }

    build_response(StatusCode::OK, &etag, ttl, CacheStatus::Hit, body)
}

fn build_response(
    status: StatusCode,
    etag: &str,
    ttl: Duration,
    cache_status: CacheStatus,
    body: Bytes,
) -> Response {
    let has_body = status != StatusCode::NOT_MODIFIED;
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("private, max-age={}", ttl.as_secs())) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status.as_str()));
    if has_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    response
}
