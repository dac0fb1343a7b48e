use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::application::analytics::{DateRange, Report, TopN, parse_date_param};
use crate::cache::{ConditionalRequest, respond_with_cache};

use super::HttpState;
use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsParams {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    #[serde(rename = "topN")]
    pub top_n: Option<String>,
}

impl AnalyticsParams {
    pub fn range(&self, now: OffsetDateTime) -> Result<DateRange, ApiError> {
        let from = present(self.date_from.as_deref())
            .map(parse_date_param)
            .transpose()?;
        let to = present(self.date_to.as_deref())
            .map(parse_date_param)
            .transpose()?;
        Ok(DateRange::resolve(from, to, now)?)
    }

    pub fn top(&self) -> Result<TopN, ApiError> {
        let Some(raw) = present(self.top_n.as_deref()) else {
            return Ok(TopN::default());
        };
        let value = raw.parse::<u32>().map_err(|_| {
            ApiError::bad_request(
                "Invalid analytics parameters",
                Some(format!("topN must be a positive integer, got `{raw}`")),
            )
        })?;
        Ok(TopN::new(value)?)
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

pub async fn overview(
    State(state): State<HttpState>,
    conditional: ConditionalRequest,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, ApiError> {
    let range = params.range(OffsetDateTime::now_utc())?;
    let top = params.top()?;
    let key = Report::Overview(top).cache_key(&range);
    let service = state.analytics.clone();

    respond_with_cache(
        &state.store,
        &conditional,
        &key,
        state.analytics_ttl,
        || async move { service.overview(range, top).await.map_err(ApiError::from) },
    )
    .await
}

pub async fn revenue_by_day(
    State(state): State<HttpState>,
    conditional: ConditionalRequest,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, ApiError> {
    let range = params.range(OffsetDateTime::now_utc())?;
    let key = Report::RevenueByDay.cache_key(&range);
    let service = state.analytics.clone();

    respond_with_cache(
        &state.store,
        &conditional,
        &key,
        state.analytics_ttl,
        || async move { service.revenue_by_day(range).await.map_err(ApiError::from) },
    )
    .await
}

pub async fn orders_by_status(
    State(state): State<HttpState>,
    conditional: ConditionalRequest,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, ApiError> {
    let range = params.range(OffsetDateTime::now_utc())?;
    let key = Report::OrdersByStatus.cache_key(&range);
    let service = state.analytics.clone();

    respond_with_cache(
        &state.store,
        &conditional,
        &key,
        state.analytics_ttl,
        || async move {
            service
                .orders_by_status(range)
                .await
                .map_err(ApiError::from)
        },
    )
    .await
}

pub async fn top_products(
    State(state): State<HttpState>,
    conditional: ConditionalRequest,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, ApiError> {
    let range = params.range(OffsetDateTime::now_utc())?;
    let top = params.top()?;
    let key = Report::TopProducts(top).cache_key(&range);
    let service = state.analytics.clone();

    respond_with_cache(
        &state.store,
        &conditional,
        &key,
        state.analytics_ttl,
        || async move { service.top_products(range, top).await.map_err(ApiError::from) },
    )
    .await
}
