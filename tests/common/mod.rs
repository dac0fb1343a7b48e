#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use shopsans::application::analytics::{AnalyticsService, DateRange};
use shopsans::application::pagination::PageWindow;
use shopsans::application::repos::{
    AnalyticsRepo, HealthRepo, RepoError, SearchPage, SearchRepo,
};
use shopsans::application::search::SearchService;
use shopsans::cache::{
    MemoryBackend, SharedStore, StoreBackend, StoreConfig, StoreConnector, StoreError,
};
use shopsans::domain::entities::{
    DailyRevenue, OrderTotals, ProductRevenue, ProductSummary, SearchHit, SearchRecord,
    StatusCount,
};
use shopsans::domain::types::SearchKind;
use shopsans::infra::http::{HttpState, RateLimitPolicy, RateLimiter};
use time::macros::datetime;
use tokio::sync::Mutex;

pub fn memory_store() -> SharedStore {
    SharedStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::memory())
}

/// Store whose connector always fails, as if the server were down.
pub fn refused_store() -> SharedStore {
    SharedStore::new(Arc::new(RefusingConnector), &StoreConfig::memory())
}

pub struct RefusingConnector;

#[async_trait]
impl StoreConnector for RefusingConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

pub fn product_hit(id: &str, title: &str) -> SearchHit {
    SearchHit::plain(SearchRecord::Product(ProductSummary {
        id: id.to_string(),
        sku: format!("SKU-{id}"),
        title: title.to_string(),
        category: Some("lighting".to_string()),
        price_cents: 2_500,
        created_at: datetime!(2024-05-01 12:00 UTC),
    }))
}

/// Recorded call to [`StubSearchRepo::substring_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubstringCall {
    pub kind: SearchKind,
    pub text: String,
    pub window: PageWindow,
    pub fields: Vec<String>,
}

/// Search repository answering from fixed pages.
#[derive(Default)]
pub struct StubSearchRepo {
    pub ranked: SearchPage,
    /// `None` makes any fallback call panic.
    pub fallback: Option<SearchPage>,
    pub fail_ranked: bool,
    pub ranked_calls: AtomicUsize,
    pub substring_calls: Mutex<Vec<SubstringCall>>,
}

impl StubSearchRepo {
    pub fn ranked(rows: Vec<SearchHit>, total: u64) -> Self {
        Self {
            ranked: SearchPage { total, rows },
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, rows: Vec<SearchHit>, total: u64) -> Self {
        self.fallback = Some(SearchPage { total, rows });
        self
    }

    pub fn ranked_calls(&self) -> usize {
        self.ranked_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchRepo for StubSearchRepo {
    async fn ranked_search(
        &self,
        _kind: SearchKind,
        _text: &str,
        _window: PageWindow,
        highlight: bool,
    ) -> Result<SearchPage, RepoError> {
        self.ranked_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ranked {
            return Err(RepoError::Timeout);
        }
        let mut page = self.ranked.clone();
        if highlight {
            for row in &mut page.rows {
                row.snippet = Some("<mark>lamp</mark>".to_string());
                row.rank = Some(0.5);
            }
        }
        Ok(page)
    }

    async fn substring_search(
        &self,
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        fields: &[&str],
    ) -> Result<SearchPage, RepoError> {
        self.substring_calls.lock().await.push(SubstringCall {
            kind,
            text: text.to_string(),
            window,
            fields: fields.iter().map(|field| field.to_string()).collect(),
        });
        match &self.fallback {
            Some(page) => Ok(page.clone()),
            None => panic!("substring fallback must not run when ranked search has rows"),
        }
    }
}

/// Analytics repository returning fixed figures and counting calls.
#[derive(Default)]
pub struct StubAnalyticsRepo {
    pub customer_calls: AtomicUsize,
    pub totals_calls: AtomicUsize,
}

#[async_trait]
impl AnalyticsRepo for StubAnalyticsRepo {
    async fn order_totals(&self, _range: &DateRange) -> Result<OrderTotals, RepoError> {
        self.totals_calls.fetch_add(1, Ordering::SeqCst);
        Ok(OrderTotals {
            revenue_cents: 10_000,
            orders_count: 3,
        })
    }

    async fn customer_count(&self) -> Result<i64, RepoError> {
        self.customer_calls.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    async fn top_products(
        &self,
        _range: &DateRange,
        limit: u32,
    ) -> Result<Vec<ProductRevenue>, RepoError> {
        Ok((0..limit.min(2))
            .map(|i| ProductRevenue {
                product_id: format!("p{i}"),
                title: format!("Product {i}"),
                revenue_cents: 5_000 - i64::from(i) * 1_000,
                units: 2,
            })
            .collect())
    }

    async fn revenue_by_day(&self, range: &DateRange) -> Result<Vec<DailyRevenue>, RepoError> {
        Ok(vec![DailyRevenue {
            day: range.from,
            revenue_cents: 10_000,
        }])
    }

    async fn orders_by_status(&self, _range: &DateRange) -> Result<Vec<StatusCount>, RepoError> {
        Ok(vec![StatusCount {
            status: "paid".to_string(),
            count: 3,
        }])
    }
}

pub struct StubHealth {
    pub healthy: bool,
}

#[async_trait]
impl HealthRepo for StubHealth {
    async fn ping(&self) -> Result<(), RepoError> {
        if self.healthy {
            Ok(())
        } else {
            Err(RepoError::from_persistence("connection refused"))
        }
    }
}

pub struct StateBuilder {
    pub search: Arc<dyn SearchRepo>,
    pub analytics: Arc<dyn AnalyticsRepo>,
    pub health: Arc<dyn HealthRepo>,
    pub store: SharedStore,
    pub search_policy: RateLimitPolicy,
    pub analytics_policy: RateLimitPolicy,
}

impl StateBuilder {
    pub fn new(store: SharedStore) -> Self {
        Self {
            search: Arc::new(StubSearchRepo::default().with_fallback(Vec::new(), 0)),
            analytics: Arc::new(StubAnalyticsRepo::default()),
            health: Arc::new(StubHealth { healthy: true }),
            store,
            search_policy: RateLimitPolicy::search(),
            analytics_policy: RateLimitPolicy::analytics(),
        }
    }

    pub fn search(mut self, repo: Arc<dyn SearchRepo>) -> Self {
        self.search = repo;
        self
    }

    pub fn analytics(mut self, repo: Arc<dyn AnalyticsRepo>) -> Self {
        self.analytics = repo;
        self
    }

    pub fn health(mut self, repo: Arc<dyn HealthRepo>) -> Self {
        self.health = repo;
        self
    }

    pub fn build(self) -> HttpState {
        HttpState {
            search: Arc::new(SearchService::new(self.search)),
            analytics: Arc::new(AnalyticsService::new(self.analytics, self.store.clone())),
            store: self.store.clone(),
            readiness: self.health,
            started_at: Instant::now(),
            search_limiter: Arc::new(RateLimiter::new(self.search_policy, self.store.clone())),
            analytics_limiter: Arc::new(RateLimiter::new(
                self.analytics_policy,
                self.store.clone(),
            )),
            search_ttl: Duration::from_secs(30),
            analytics_ttl: Duration::from_secs(60),
        }
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.10")
        .body(Body::empty())
        .expect("request")
}

pub async fn body_bytes(response: Response) -> bytes::Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("json body")
}
