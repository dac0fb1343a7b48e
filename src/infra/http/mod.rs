//! HTTP surface: health probes, search and analytics reads.

mod analytics;
mod error;
mod health;
mod middleware;
mod rate_limit;
mod search;

pub use analytics::AnalyticsParams;
pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use health::{Liveness, Readiness};
pub use middleware::{RequestContext, X_REQUEST_ID};
pub use rate_limit::{
    RateBackend, RateDecision, RateLimitPolicy, RateLimiter, RateStatus, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, client_identity, rate_limit,
};
pub use search::SearchParams;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::analytics::AnalyticsService;
use crate::application::repos::HealthRepo;
use crate::application::search::SearchService;
use crate::cache::SharedStore;

#[derive(Clone)]
pub struct HttpState {
    pub search: Arc<SearchService>,
    pub analytics: Arc<AnalyticsService>,
    pub store: SharedStore,
    pub readiness: Arc<dyn HealthRepo>,
    pub started_at: Instant,
    pub search_limiter: Arc<RateLimiter>,
    pub analytics_limiter: Arc<RateLimiter>,
    pub search_ttl: Duration,
    pub analytics_ttl: Duration,
}

pub fn build_router(state: HttpState) -> Router {
    let search_routes = Router::new()
        .route("/search", get(search::search))
        .route_layer(from_fn_with_state(state.search_limiter.clone(), rate_limit));

    let analytics_routes = Router::new()
        .route("/analytics/overview", get(analytics::overview))
        .route("/analytics/revenue-by-day", get(analytics::revenue_by_day))
        .route("/analytics/orders-by-status", get(analytics::orders_by_status))
        .route("/analytics/top-products", get(analytics::top_products))
        .route_layer(from_fn_with_state(
            state.analytics_limiter.clone(),
            rate_limit,
        ));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .merge(search_routes)
        .merge(analytics_routes)
        .fallback(not_found)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
        .with_state(state)
}

async fn not_found() -> Response {
    ApiError::not_found("No such route").into_response()
}
