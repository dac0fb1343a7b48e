//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::analytics::DateRange;
use crate::application::pagination::{PageWindow, PaginationError};
use crate::domain::entities::{DailyRevenue, OrderTotals, ProductRevenue, SearchHit, StatusCount};
use crate::domain::types::SearchKind;

/// Closed set of failures a persistence adapter may report.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// One page of search rows plus the match count of the predicate that produced them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub total: u64,
    pub rows: Vec<SearchHit>,
}

#[async_trait]
pub trait SearchRepo: Send + Sync {
    /// Full-text match ordered by relevance; `highlight` requests excerpts.
    async fn ranked_search(
        &self,
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        highlight: bool,
    ) -> Result<SearchPage, RepoError>;

    /// Case-insensitive substring match over `fields`, newest first.
    async fn substring_search(
        &self,
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        fields: &[&str],
    ) -> Result<SearchPage, RepoError>;
}

#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    /// Revenue and order count for revenue-bearing orders in `range`.
    async fn order_totals(&self, range: &DateRange) -> Result<OrderTotals, RepoError>;

    async fn customer_count(&self) -> Result<i64, RepoError>;

    async fn top_products(
        &self,
        range: &DateRange,
        limit: u32,
    ) -> Result<Vec<ProductRevenue>, RepoError>;

    async fn revenue_by_day(&self, range: &DateRange) -> Result<Vec<DailyRevenue>, RepoError>;

    async fn orders_by_status(&self, range: &DateRange) -> Result<Vec<StatusCount>, RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
