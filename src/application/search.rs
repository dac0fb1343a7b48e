//! Ranked search with a substring fallback.
//!
//! Stage one runs the relevance query. Only when it yields no rows for the
//! requested page does stage two scan the kind's text columns with a
//! case-insensitive substring match. The envelope reports which stage
//! produced the rows, and `total` always belongs to that same stage.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::application::pagination::PageWindow;
use crate::application::repos::{RepoError, SearchPage, SearchRepo};
use crate::cache::CacheKey;
use crate::domain::entities::SearchHit;
use crate::domain::types::{SearchKind, SearchSource};

pub const SEARCH_CACHE_NAMESPACE: &str = "search";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search text must not be empty")]
    EmptyQuery,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub kind: SearchKind,
    pub text: String,
    pub window: PageWindow,
    pub highlight: bool,
}

impl SearchQuery {
    pub fn new(
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        highlight: bool,
    ) -> Result<Self, SearchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        Ok(Self {
            kind,
            text: text.to_string(),
            window,
            highlight,
        })
    }

    /// Key covering every input that changes the result envelope.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(SEARCH_CACHE_NAMESPACE)
            .with("type", self.kind)
            .with("q", &self.text)
            .with("page", self.window.page())
            .with("pageSize", self.window.page_size())
            .with("hl", u8::from(self.highlight))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub source: SearchSource,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    #[serde(rename = "data")]
    pub rows: Vec<SearchHit>,
}

impl SearchResults {
    fn from_page(query: &SearchQuery, source: SearchSource, page: SearchPage) -> Self {
        Self {
            kind: query.kind,
            source,
            page: query.window.page(),
            page_size: query.window.page_size(),
            total: page.total,
            rows: page.rows,
        }
    }
}

#[derive(Clone)]
pub struct SearchService {
    repo: Arc<dyn SearchRepo>,
}

impl SearchService {
    pub fn new(repo: Arc<dyn SearchRepo>) -> Self {
        Self { repo }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchError> {
        let ranked = self
            .repo
            .ranked_search(query.kind, &query.text, query.window, query.highlight)
            .await?;

        if !ranked.rows.is_empty() {
            record(query.kind, SearchSource::Ranked);
            return Ok(SearchResults::from_page(query, SearchSource::Ranked, ranked));
        }

        debug!(
            kind = query.kind.as_str(),
            page = query.window.page(),
            "ranked search empty; falling back to substring match"
        );
        let mut fallback = self
            .repo
            .substring_search(
                query.kind,
                &query.text,
                query.window,
                query.kind.substring_fields(),
            )
            .await?;
        for row in &mut fallback.rows {
            row.rank = None;
            row.snippet = None;
        }

        record(query.kind, SearchSource::Fallback);
        Ok(SearchResults::from_page(
            query,
            SearchSource::Fallback,
            fallback,
        ))
    }
}

fn record(kind: SearchKind, source: SearchSource) {
    counter!(
        "shopsans_search_total",
        "type" => kind.as_str(),
        "source" => source.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::domain::entities::{ProductSummary, SearchRecord};

    fn query(text: &str) -> SearchQuery {
        SearchQuery::new(SearchKind::Products, text, PageWindow::default(), false)
            .expect("query")
    }

    #[test]
    fn text_is_trimmed_and_required() {
        assert_eq!(query("  lamp ").text, "lamp");
        assert!(matches!(
            SearchQuery::new(SearchKind::Tickets, "   ", PageWindow::default(), true),
            Err(SearchError::EmptyQuery)
        ));
    }

    #[test]
    fn cache_key_covers_every_input() {
        let base = query("lamp");
        let mut highlighted = base.clone();
        highlighted.highlight = true;
        let mut second_page = base.clone();
        second_page.window = PageWindow::new(2, 10).expect("window");
        let mut customers = base.clone();
        customers.kind = SearchKind::Customers;

        let keys = [
            base.cache_key(),
            highlighted.cache_key(),
            second_page.cache_key(),
            customers.cache_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(base.cache_key(), query(" lamp").cache_key());
        assert!(base.cache_key().as_str().starts_with("search:"));
    }

    #[test]
    fn envelope_shape() {
        let results = SearchResults {
            kind: SearchKind::Products,
            source: SearchSource::Fallback,
            page: 1,
            page_size: 10,
            total: 1,
            rows: vec![SearchHit::plain(SearchRecord::Product(ProductSummary {
                id: "p1".to_string(),
                sku: "SKU-1".to_string(),
                title: "Desk lamp".to_string(),
                category: None,
                price_cents: 1999,
                created_at: datetime!(2024-05-01 12:00 UTC),
            }))],
        };

        assert_eq!(
            serde_json::to_value(&results).expect("json"),
            json!({
                "type": "products",
                "source": "fallback",
                "page": 1,
                "pageSize": 10,
                "total": 1,
                "data": [{
                    "id": "p1",
                    "sku": "SKU-1",
                    "title": "Desk lamp",
                    "category": null,
                    "priceCents": 1999,
                    "createdAt": "2024-05-01T12:00:00Z"
                }]
            })
        );
    }
}
