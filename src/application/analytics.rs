//! Sales analytics served from the store of record.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::application::repos::{AnalyticsRepo, RepoError};
use crate::cache::{CacheError, CacheKey, SharedStore, cached};
use crate::domain::entities::{DailyRevenue, OrderTotals, ProductRevenue, StatusCount};

pub const DEFAULT_RANGE_DAYS: i64 = 30;
pub const DEFAULT_TOP_N: u32 = 10;
pub const MAX_TOP_N: u32 = 50;
pub const CUSTOMER_COUNT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("`{value}` is not an RFC 3339 timestamp or YYYY-MM-DD date")]
    InvalidDate { value: String },
    #[error("dateFrom must not be after dateTo")]
    InvertedRange,
    #[error("topN must be between 1 and {MAX_TOP_N}, got {0}")]
    InvalidTopN(u32),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Inclusive time range an analytics report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
}

impl DateRange {
    /// Fill in missing bounds: `to` defaults to `now` floored to the minute,
    /// `from` to thirty days before `to`.
    pub fn resolve(
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<Self, AnalyticsError> {
        let to = to
            .unwrap_or_else(|| floor_to_minute(now))
            .to_offset(UtcOffset::UTC);
        let from = from
            .unwrap_or(to - time::Duration::days(DEFAULT_RANGE_DAYS))
            .to_offset(UtcOffset::UTC);
        if from > to {
            return Err(AnalyticsError::InvertedRange);
        }
        Ok(Self { from, to })
    }
}

// Flooring keeps defaulted ranges stable across requests so they share cache entries.
fn floor_to_minute(instant: OffsetDateTime) -> OffsetDateTime {
    instant
        .replace_second(0)
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(instant)
}

/// Accept `2024-05-01T10:00:00Z` or a bare `2024-05-01` (midnight UTC).
///
/// The result is always in UTC: the same instant written with different
/// offsets must yield the same report bytes.
pub fn parse_date_param(raw: &str) -> Result<OffsetDateTime, AnalyticsError> {
    let raw = raw.trim();
    if let Ok(instant) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(instant.to_offset(UtcOffset::UTC));
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| AnalyticsError::InvalidDate {
            value: raw.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopN(u32);

impl TopN {
    pub fn new(value: u32) -> Result<Self, AnalyticsError> {
        if value == 0 || value > MAX_TOP_N {
            return Err(AnalyticsError::InvalidTopN(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for TopN {
    fn default() -> Self {
        Self(DEFAULT_TOP_N)
    }
}

/// The cacheable analytics reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Overview(TopN),
    RevenueByDay,
    OrdersByStatus,
    TopProducts(TopN),
}

impl Report {
    pub fn cache_key(self, range: &DateRange) -> CacheKey {
        let namespace = match self {
            Report::Overview(_) => "overview",
            Report::RevenueByDay => "revday",
            Report::OrdersByStatus => "ordstatus",
            Report::TopProducts(_) => "topprod",
        };
        let key = CacheKey::new(namespace)
            .with("from", range.from.unix_timestamp_nanos())
            .with("to", range.to.unix_timestamp_nanos());
        match self {
            Report::Overview(top) | Report::TopProducts(top) => key.with("top", top.get()),
            Report::RevenueByDay | Report::OrdersByStatus => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub revenue_cents: i64,
    pub orders_count: i64,
    pub aov_cents: i64,
    pub customers_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub range: DateRange,
    pub kpis: Kpis,
    pub top_products: Vec<ProductRevenue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenueSeries {
    pub range: DateRange,
    pub series: Vec<DailyRevenue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub range: DateRange,
    pub breakdown: Vec<StatusCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopProducts {
    pub range: DateRange,
    pub data: Vec<ProductRevenue>,
}

/// Mean order value in cents, rounded half away from zero.
pub fn average_order_value(totals: OrderTotals) -> i64 {
    if totals.orders_count <= 0 {
        return 0;
    }
    let revenue = i128::from(totals.revenue_cents);
    let orders = i128::from(totals.orders_count);
    let doubled = revenue * 2;
    let rounded = if doubled >= 0 {
        (doubled + orders) / (orders * 2)
    } else {
        (doubled - orders) / (orders * 2)
    };
    i64::try_from(rounded).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct AnalyticsService {
    repo: Arc<dyn AnalyticsRepo>,
    store: SharedStore,
}

impl AnalyticsService {
    pub fn new(repo: Arc<dyn AnalyticsRepo>, store: SharedStore) -> Self {
        Self { repo, store }
    }

    pub async fn overview(&self, range: DateRange, top: TopN) -> Result<Overview, AnalyticsError> {
        let (totals, customers_count, top_products) = tokio::try_join!(
            async {
                self.repo
                    .order_totals(&range)
                    .await
                    .map_err(AnalyticsError::from)
            },
            self.customer_count(),
            async {
                self.repo
                    .top_products(&range, top.get())
                    .await
                    .map_err(AnalyticsError::from)
            },
        )?;

        Ok(Overview {
            range,
            kpis: Kpis {
                revenue_cents: totals.revenue_cents,
                orders_count: totals.orders_count,
                aov_cents: average_order_value(totals),
                customers_count,
            },
            top_products,
        })
    }

    /// Customer total across all time; changes slowly, so it is memoised separately.
    pub async fn customer_count(&self) -> Result<i64, AnalyticsError> {
        let key = CacheKey::new("customers").with("stat", "count");
        cached(&self.store, &key, CUSTOMER_COUNT_TTL, || async {
            self.repo
                .customer_count()
                .await
                .map_err(AnalyticsError::from)
        })
        .await
    }

    pub async fn revenue_by_day(&self, range: DateRange) -> Result<RevenueSeries, AnalyticsError> {
        let series = self.repo.revenue_by_day(&range).await?;
        Ok(RevenueSeries { range, series })
    }

    pub async fn orders_by_status(
        &self,
        range: DateRange,
    ) -> Result<StatusBreakdown, AnalyticsError> {
        let breakdown = self.repo.orders_by_status(&range).await?;
        Ok(StatusBreakdown { range, breakdown })
    }

    pub async fn top_products(
        &self,
        range: DateRange,
        top: TopN,
    ) -> Result<TopProducts, AnalyticsError> {
        let data = self.repo.top_products(&range, top.get()).await?;
        Ok(TopProducts { range, data })
    }
}
