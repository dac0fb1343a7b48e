mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    http::{Request, StatusCode, header::ETAG},
};
use shopsans::cache::{SharedStore, X_CACHE};
use shopsans::infra::http::{X_REQUEST_ID, build_router};
use tower::ServiceExt;

use common::{
    StateBuilder, StubAnalyticsRepo, StubHealth, body_bytes, body_json, get, memory_store,
    refused_store,
};

#[tokio::test]
async fn healthz_reports_liveness() {
    let router = build_router(StateBuilder::new(SharedStore::disabled()).build());

    let response = router.oneshot(get("/healthz")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert!(body["uptimeSeconds"].is_u64());
}

#[tokio::test]
async fn readyz_reports_store_health_without_failing() {
    for (store, expected) in [
        (SharedStore::disabled(), "disabled"),
        (memory_store(), "connected"),
        (refused_store(), "degraded"),
    ] {
        let router = build_router(StateBuilder::new(store).build());
        let response = router.oneshot(get("/readyz")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK, "store {expected}");
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["db"], "ok");
        assert_eq!(body["store"], expected);
    }
}

#[tokio::test]
async fn readyz_fails_when_the_database_is_down() {
    let router = build_router(
        StateBuilder::new(memory_store())
            .health(Arc::new(StubHealth { healthy: false }))
            .build(),
    );

    let response = router.oneshot(get("/readyz")).await.expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["db"], "unavailable");
}

#[tokio::test]
async fn request_id_is_propagated_or_generated() {
    let router = build_router(StateBuilder::new(SharedStore::disabled()).build());

    let echoed = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header(X_REQUEST_ID, "req-123")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(echoed.headers()[X_REQUEST_ID], "req-123");

    let generated = router.oneshot(get("/healthz")).await.expect("response");
    let id = generated.headers()[X_REQUEST_ID].to_str().expect("ascii");
    assert!(uuid::Uuid::parse_str(id).is_ok(), "{id} is not a uuid");
}

#[tokio::test]
async fn unknown_routes_get_a_json_not_found() {
    let router = build_router(StateBuilder::new(SharedStore::disabled()).build());

    let response = router.oneshot(get("/orders")).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "not_found");
}

#[tokio::test]
async fn overview_combines_kpis_and_memoises_the_customer_count() {
    let repo = Arc::new(StubAnalyticsRepo::default());
    let router = build_router(
        StateBuilder::new(memory_store())
            .analytics(repo.clone())
            .build(),
    );

    let first = router
        .clone()
        .oneshot(get(
            "/analytics/overview?dateFrom=2024-05-01&dateTo=2024-05-31&topN=2",
        ))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[X_CACHE], "MISS");
    assert_eq!(first.headers()["x-ratelimit-limit"], "120");
    let body = body_json(first).await;
    assert_eq!(body["range"]["from"], "2024-05-01T00:00:00Z");
    assert_eq!(body["range"]["to"], "2024-05-31T00:00:00Z");
    assert_eq!(body["kpis"]["revenueCents"], 10_000);
    assert_eq!(body["kpis"]["ordersCount"], 3);
    assert_eq!(body["kpis"]["aovCents"], 3_333);
    assert_eq!(body["kpis"]["customersCount"], 42);
    assert_eq!(body["topProducts"].as_array().map(Vec::len), Some(2));

    // A different window misses the response cache but reuses the memoised count.
    let second = router
        .oneshot(get(
            "/analytics/overview?dateFrom=2024-04-01&dateTo=2024-04-30&topN=2",
        ))
        .await
        .expect("response");
    assert_eq!(second.headers()[X_CACHE], "MISS");
    assert_eq!(repo.totals_calls.load(Ordering::SeqCst), 2);
    assert_eq!(repo.customer_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn analytics_reports_validate_their_parameters() {
    let router = build_router(StateBuilder::new(SharedStore::disabled()).build());

    for uri in [
        "/analytics/revenue-by-day?dateFrom=yesterday",
        "/analytics/orders-by-status?dateFrom=2024-06-01&dateTo=2024-05-01",
        "/analytics/top-products?topN=0",
        "/analytics/top-products?topN=51",
    ] {
        let response = router.clone().oneshot(get(uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }

    for uri in [
        "/analytics/revenue-by-day",
        "/analytics/orders-by-status",
        "/analytics/top-products?topN=1",
    ] {
        let response = router.clone().oneshot(get(uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn same_instant_with_different_offsets_yields_identical_bytes() {
    let router = build_router(
        StateBuilder::new(memory_store())
            .analytics(Arc::new(StubAnalyticsRepo::default()))
            .build(),
    );
    let offset = "/analytics/revenue-by-day?dateFrom=2024-05-01T08:30:00%2B02:00&dateTo=2024-05-31T00:00:00Z";
    let utc = "/analytics/revenue-by-day?dateFrom=2024-05-01T06:30:00Z&dateTo=2024-05-31T00:00:00Z";

    let first = router.clone().oneshot(get(offset)).await.expect("response");
    assert_eq!(first.headers()[X_CACHE], "MISS");
    let first_etag = first.headers()[ETAG].clone();
    let first_body = body_bytes(first).await;

    let cached = router.clone().oneshot(get(utc)).await.expect("response");
    assert_eq!(cached.headers()[X_CACHE], "HIT");
    assert_eq!(cached.headers()[ETAG], first_etag);
    assert_eq!(body_bytes(cached).await, first_body);

    let fresh = router
        .oneshot(get(&format!("{utc}&nocache=1")))
        .await
        .expect("response");
    assert_eq!(fresh.headers()[X_CACHE], "MISS");
    assert_eq!(fresh.headers()[ETAG], first_etag);
    let fresh_body = body_bytes(fresh).await;
    assert_eq!(fresh_body, first_body);

    let body: serde_json::Value = serde_json::from_slice(&fresh_body).expect("json");
    assert_eq!(body["range"]["from"], "2024-05-01T06:30:00Z");
}
