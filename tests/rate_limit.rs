mod common;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::RETRY_AFTER},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
};
use shopsans::cache::SharedStore;
use shopsans::infra::http::{
    RateBackend, RateLimitPolicy, RateLimiter, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET, rate_limit,
};
use tower::ServiceExt;

use common::{body_json, memory_store, refused_store};

fn policy(limit: u32) -> RateLimitPolicy {
    RateLimitPolicy::new(
        "rl:test",
        NonZeroU32::new(limit).expect("non-zero"),
        Duration::from_secs(60),
    )
}

fn limited_router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/limited", get(|| async { "ok" }))
        .route_layer(from_fn_with_state(limiter, rate_limit))
}

async fn hit(router: &Router, client: &str) -> Response {
    let request = Request::builder()
        .uri("/limited")
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .expect("request");
    router.clone().oneshot(request).await.expect("response")
}

fn header_u64(response: &Response, name: &str) -> u64 {
    response.headers()[name]
        .to_str()
        .expect("ascii header")
        .parse()
        .expect("numeric header")
}

async fn assert_budget_then_reject(router: &Router, client: &str) {
    for expected_remaining in [4_u64, 3, 2, 1, 0] {
        let response = hit(router, client).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_u64(&response, X_RATELIMIT_LIMIT.as_str()), 5);
        assert_eq!(
            header_u64(&response, X_RATELIMIT_REMAINING.as_str()),
            expected_remaining
        );
        let reset = header_u64(&response, X_RATELIMIT_RESET.as_str());
        assert!((1..=60).contains(&reset), "reset {reset} outside window");
    }

    let rejected = hit(router, client).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = header_u64(&rejected, RETRY_AFTER.as_str());
    assert!(retry_after > 0 && retry_after <= 60, "retry-after {retry_after}");
    assert_eq!(header_u64(&rejected, X_RATELIMIT_REMAINING.as_str()), 0);

    let body = body_json(rejected).await;
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn shared_store_counts_down_then_rejects() {
    let limiter = Arc::new(RateLimiter::new(policy(5), memory_store()));
    let router = limited_router(limiter);

    assert_budget_then_reject(&router, "203.0.113.1").await;

    // Another client keeps its own budget.
    let other = hit(&router, "203.0.113.2").await;
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(header_u64(&other, X_RATELIMIT_REMAINING.as_str()), 4);
}

#[tokio::test]
async fn unreachable_store_falls_back_to_local_windows() {
    for store in [SharedStore::disabled(), refused_store()] {
        let limiter = Arc::new(RateLimiter::new(policy(5), store));
        let router = limited_router(Arc::clone(&limiter));

        assert_budget_then_reject(&router, "203.0.113.3").await;
        assert_eq!(limiter.local_windows(), 1);
        assert_eq!(
            limiter.check("203.0.113.3").await.status().backend,
            RateBackend::Memory
        );
    }
}

#[tokio::test(start_paused = true)]
async fn shared_window_expires_and_budget_returns() {
    let limiter = Arc::new(RateLimiter::new(policy(1), memory_store()));
    let router = limited_router(limiter);

    assert_eq!(hit(&router, "203.0.113.4").await.status(), StatusCode::OK);
    assert_eq!(
        hit(&router, "203.0.113.4").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::advance(Duration::from_secs(61)).await;
    let renewed = hit(&router, "203.0.113.4").await;
    assert_eq!(renewed.status(), StatusCode::OK);
    assert_eq!(header_u64(&renewed, X_RATELIMIT_REMAINING.as_str()), 0);
}

#[tokio::test(start_paused = true)]
async fn local_window_expires_and_budget_returns() {
    let limiter = Arc::new(RateLimiter::new(policy(1), SharedStore::disabled()));
    let router = limited_router(Arc::clone(&limiter));

    assert_eq!(hit(&router, "203.0.113.5").await.status(), StatusCode::OK);
    let rejected = hit(&router, "203.0.113.5").await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_u64(&rejected, RETRY_AFTER.as_str()), 60);

    tokio::time::advance(Duration::from_secs(30)).await;
    let later = hit(&router, "203.0.113.5").await;
    assert_eq!(header_u64(&later, RETRY_AFTER.as_str()), 30);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(hit(&router, "203.0.113.5").await.status(), StatusCode::OK);
    assert_eq!(limiter.prune_expired(), 0);
}

#[tokio::test]
async fn counter_without_expiry_is_rearmed() {
    let store = memory_store();
    // A counter left behind without a TTL would otherwise block the client forever.
    store.incr("rl:test:203.0.113.6").await.expect("seed counter");
    assert_eq!(store.ttl("rl:test:203.0.113.6").await.expect("ttl"), -1);

    let limiter = Arc::new(RateLimiter::new(policy(5), store.clone()));
    let response = hit(&limited_router(limiter), "203.0.113.6").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_u64(&response, X_RATELIMIT_REMAINING.as_str()), 3);
    let ttl = store.ttl("rl:test:203.0.113.6").await.expect("ttl");
    assert!(ttl > 0 && ttl <= 60, "ttl {ttl}");
}

#[tokio::test]
async fn unknown_clients_share_one_budget() {
    let limiter = Arc::new(RateLimiter::new(policy(1), memory_store()));
    let router = limited_router(limiter);
    let anonymous = || Request::builder().uri("/limited").body(Body::empty()).expect("request");

    let first = router.clone().oneshot(anonymous()).await.expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let second = router.clone().oneshot(anonymous()).await.expect("response");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
