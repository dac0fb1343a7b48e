use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::application::pagination::{DEFAULT_PAGE_SIZE, PageWindow};
use crate::application::search::SearchQuery;
use crate::cache::{ConditionalRequest, respond_with_cache};
use crate::domain::types::SearchKind;

use super::HttpState;
use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub q: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub highlight: Option<String>,
}

impl SearchParams {
    pub fn into_query(self) -> Result<SearchQuery, ApiError> {
        let kind = self
            .kind
            .as_deref()
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| ApiError::bad_request("Missing search type", None))?
            .parse::<SearchKind>()?;

        let page = parse_number("page", self.page.as_deref(), 1)?;
        let page_size = parse_number("pageSize", self.page_size.as_deref(), DEFAULT_PAGE_SIZE)?;
        let window = PageWindow::new(page, page_size).map_err(|err| {
            ApiError::bad_request("Invalid pagination", Some(err.to_string()))
        })?;

        let highlight = parse_flag(self.highlight.as_deref())?;
        let text = self.q.unwrap_or_default();
        Ok(SearchQuery::new(kind, &text, window, highlight)?)
    }
}

fn parse_number(name: &str, raw: Option<&str>, default: u32) -> Result<u32, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse::<u32>().map_err(|_| {
            ApiError::bad_request(
                "Invalid pagination",
                Some(format!("{name} must be a positive integer, got `{value}`")),
            )
        }),
    }
}

fn parse_flag(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ApiError::bad_request(
            "Invalid highlight flag",
            Some(format!("highlight must be 1, true, 0 or false, got `{other}`")),
        )),
    }
}

pub async fn search(
    State(state): State<HttpState>,
    conditional: ConditionalRequest,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let query = params.into_query()?;
    let key = query.cache_key();
    let service = state.search.clone();

    respond_with_cache(
        &state.store,
        &conditional,
        &key,
        state.search_ttl,
        || async move { service.search(&query).await.map_err(ApiError::from) },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> SearchParams {
        let mut params = SearchParams::default();
        for (name, value) in pairs {
            let value = Some((*value).to_string());
            match *name {
                "type" => params.kind = value,
                "q" => params.q = value,
                "page" => params.page = value,
                "pageSize" => params.page_size = value,
                "highlight" => params.highlight = value,
                other => panic!("unknown param {other}"),
            }
        }
        params
    }

    #[test]
    fn defaults_apply_when_paging_is_omitted() {
        let query = params(&[("type", "products"), ("q", "  lamp ")])
            .into_query()
            .expect("query");
        assert_eq!(query.kind, SearchKind::Products);
        assert_eq!(query.text, "lamp");
        assert_eq!(query.window, PageWindow::default());
        assert!(!query.highlight);
    }

    #[test]
    fn highlight_accepts_word_and_digit_forms() {
        for (raw, expected) in [("1", true), ("true", true), ("0", false), ("false", false)] {
            let query = params(&[("type", "tickets"), ("q", "refund"), ("highlight", raw)])
                .into_query()
                .expect("query");
            assert_eq!(query.highlight, expected, "highlight={raw}");
        }
        assert!(
            params(&[("type", "tickets"), ("q", "refund"), ("highlight", "yes")])
                .into_query()
                .is_err()
        );
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let cases: &[&[(&str, &str)]] = &[
            &[("q", "lamp")],
            &[("type", "orders"), ("q", "lamp")],
            &[("type", "products"), ("q", "   ")],
            &[("type", "products"), ("q", "lamp"), ("page", "0")],
            &[("type", "products"), ("q", "lamp"), ("pageSize", "51")],
            &[("type", "products"), ("q", "lamp"), ("page", "two")],
        ];
        for case in cases {
            assert!(params(case).into_query().is_err(), "{case:?} should fail");
        }
    }
}
