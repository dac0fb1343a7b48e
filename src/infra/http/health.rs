use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::debug;

use crate::application::error::ErrorReport;
use crate::cache::StoreHealth;

use super::HttpState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Liveness {
    pub ok: bool,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub ok: bool,
    pub db: &'static str,
    pub store: StoreHealth,
}

pub async fn healthz(State(state): State<HttpState>) -> Json<Liveness> {
    Json(Liveness {
        ok: true,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Ready while the database answers; the shared cache store is reported but never blocks readiness.
pub async fn readyz(State(state): State<HttpState>) -> Response {
    if state.store.ping().await.is_err() {
        debug!(health = state.store.health().as_str(), "shared cache store not answering");
    }
    let store = state.store.health();

    match state.readiness.ping().await {
        Ok(()) => Json(Readiness {
            ok: true,
            db: "ok",
            store,
        })
        .into_response(),
        Err(err) => {
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    ok: false,
                    db: "unavailable",
                    store,
                }),
            )
                .into_response();
            ErrorReport::from_error("infra::http::readyz", StatusCode::SERVICE_UNAVAILABLE, &err)
                .attach(&mut response);
            response
        }
    }
}
