use async_trait::async_trait;
use sqlx::postgres::PgRow;
use time::OffsetDateTime;

use crate::{
    application::pagination::PageWindow,
    application::repos::{RepoError, SearchPage, SearchRepo},
    domain::entities::{CustomerSummary, ProductSummary, SearchHit, SearchRecord, TicketSummary},
    domain::types::SearchKind,
};

use super::{PostgresRepositories, map_sqlx_error};

const TS_CONFIG: &str = "english";
const HEADLINE_OPTIONS: &str = "StartSel=<mark>,StopSel=</mark>,MaxFragments=2,MinWords=5,MaxWords=20";

/// Where each searchable kind lives and which columns it projects.
struct SearchTable {
    table: &'static str,
    columns: &'static str,
    /// Document excerpts are cut from.
    headline_document: &'static str,
}

fn table_for(kind: SearchKind) -> SearchTable {
    match kind {
        SearchKind::Customers => SearchTable {
            table: "\"Customer\"",
            columns: "id, name, email, country, (\"createdAt\" AT TIME ZONE 'UTC') AS created_at",
            headline_document: "name || ' ' || coalesce(email, '')",
        },
        SearchKind::Products => SearchTable {
            table: "\"Product\"",
            columns: "id, sku, title, category, \"priceCents\" AS price_cents, \
                      (\"createdAt\" AT TIME ZONE 'UTC') AS created_at",
            headline_document: "title || ' ' || coalesce(category, '')",
        },
        SearchKind::Tickets => SearchTable {
            table: "\"Ticket\"",
            columns: "id, \"customerId\" AS customer_id, subject, \
                      (\"createdAt\" AT TIME ZONE 'UTC') AS created_at",
            headline_document: "subject || ' ' || body",
        },
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: String,
    name: String,
    email: Option<String>,
    country: Option<String>,
    created_at: OffsetDateTime,
    rank: Option<f32>,
    snippet: Option<String>,
}

impl From<CustomerRow> for SearchHit {
    fn from(row: CustomerRow) -> Self {
        Self {
            record: SearchRecord::Customer(CustomerSummary {
                id: row.id,
                name: row.name,
                email: row.email,
                country: row.country,
                created_at: row.created_at,
            }),
            rank: row.rank,
            snippet: row.snippet,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    title: String,
    category: Option<String>,
    price_cents: i32,
    created_at: OffsetDateTime,
    rank: Option<f32>,
    snippet: Option<String>,
}

impl From<ProductRow> for SearchHit {
    fn from(row: ProductRow) -> Self {
        Self {
            record: SearchRecord::Product(ProductSummary {
                id: row.id,
                sku: row.sku,
                title: row.title,
                category: row.category,
                price_cents: row.price_cents,
                created_at: row.created_at,
            }),
            rank: row.rank,
            snippet: row.snippet,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    customer_id: String,
    subject: String,
    created_at: OffsetDateTime,
    rank: Option<f32>,
    snippet: Option<String>,
}

impl From<TicketRow> for SearchHit {
    fn from(row: TicketRow) -> Self {
        Self {
            record: SearchRecord::Ticket(TicketSummary {
                id: row.id,
                customer_id: row.customer_id,
                subject: row.subject,
                created_at: row.created_at,
            }),
            rank: row.rank,
            snippet: row.snippet,
        }
    }
}

/// Bound parameters of one search statement, in placeholder order.
enum SearchBinds<'a> {
    Ranked {
        text: &'a str,
        highlight: bool,
        window: PageWindow,
    },
    Substring {
        pattern: &'a str,
        window: PageWindow,
    },
}

impl PostgresRepositories {
    async fn fetch_hits<R>(&self, sql: &str, binds: &SearchBinds<'_>) -> Result<Vec<SearchHit>, RepoError>
    where
        R: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin + Into<SearchHit>,
    {
        let query = sqlx::query_as::<_, R>(sql);
        let query = match *binds {
            SearchBinds::Ranked {
                text,
                highlight,
                window,
            } => query
                .bind(text)
                .bind(highlight)
                .bind(window.limit())
                .bind(window.offset()),
            SearchBinds::Substring { pattern, window } => query
                .bind(pattern)
                .bind(window.limit())
                .bind(window.offset()),
        };

        let rows = query.fetch_all(self.pool()).await.map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_kind(
        &self,
        kind: SearchKind,
        sql: &str,
        binds: &SearchBinds<'_>,
    ) -> Result<Vec<SearchHit>, RepoError> {
        match kind {
            SearchKind::Customers => self.fetch_hits::<CustomerRow>(sql, binds).await,
            SearchKind::Products => self.fetch_hits::<ProductRow>(sql, binds).await,
            SearchKind::Tickets => self.fetch_hits::<TicketRow>(sql, binds).await,
        }
    }

    async fn count_matches(&self, sql: &str, value: &str) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(value)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }
}

#[async_trait]
impl SearchRepo for PostgresRepositories {
    async fn ranked_search(
        &self,
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        highlight: bool,
    ) -> Result<SearchPage, RepoError> {
        let table = table_for(kind);
        let rows_sql = format!(
            "WITH t AS (SELECT websearch_to_tsquery('{TS_CONFIG}', $1) AS q) \
             SELECT {columns}, \
                    ts_rank_cd(searchvec, t.q) AS rank, \
                    CASE WHEN $2 THEN ts_headline('{TS_CONFIG}', {document}, t.q, '{HEADLINE_OPTIONS}') \
                         ELSE NULL END AS snippet \
             FROM {name}, t \
             WHERE searchvec @@ t.q \
             ORDER BY rank DESC, id \
             LIMIT $3 OFFSET $4",
            columns = table.columns,
            document = table.headline_document,
            name = table.table,
        );
        let count_sql = format!(
            "WITH t AS (SELECT websearch_to_tsquery('{TS_CONFIG}', $1) AS q) \
             SELECT count(*)::bigint FROM {name}, t WHERE searchvec @@ t.q",
            name = table.table,
        );

        let binds = SearchBinds::Ranked {
            text,
            highlight,
            window,
        };
        let rows = self.fetch_kind(kind, &rows_sql, &binds).await?;
        let total = self.count_matches(&count_sql, text).await?;

        Ok(SearchPage { total, rows })
    }

    async fn substring_search(
        &self,
        kind: SearchKind,
        text: &str,
        window: PageWindow,
        fields: &[&str],
    ) -> Result<SearchPage, RepoError> {
        let table = table_for(kind);
        let predicate = substring_predicate(kind, fields)?;
        let pattern = like_pattern(text);

        let rows_sql = format!(
            "SELECT {columns}, NULL::real AS rank, NULL::text AS snippet \
             FROM {name} \
             WHERE {predicate} \
             ORDER BY \"createdAt\" DESC, id \
             LIMIT $2 OFFSET $3",
            columns = table.columns,
            name = table.table,
        );
        let count_sql = format!(
            "SELECT count(*)::bigint FROM {name} WHERE {predicate}",
            name = table.table,
        );

        let binds = SearchBinds::Substring {
            pattern: &pattern,
            window,
        };
        let rows = self.fetch_kind(kind, &rows_sql, &binds).await?;
        let total = self.count_matches(&count_sql, &pattern).await?;

        Ok(SearchPage { total, rows })
    }
}

/// `("a" ILIKE $1 OR "b" ILIKE $1)`; only the kind's own text columns are accepted.
fn substring_predicate(kind: SearchKind, fields: &[&str]) -> Result<String, RepoError> {
    if fields.is_empty() {
        return Err(RepoError::InvalidInput {
            message: "substring search needs at least one field".to_string(),
        });
    }
    let allowed = kind.substring_fields();
    let mut clauses = Vec::with_capacity(fields.len());
    for field in fields {
        if !allowed.contains(field) {
            return Err(RepoError::InvalidInput {
                message: format!("`{field}` is not searchable for {kind}"),
            });
        }
        clauses.push(format!("\"{field}\" ILIKE $1"));
    }
    Ok(format!("({})", clauses.join(" OR ")))
}

/// Wrap `text` in `%...%`, escaping LIKE wildcards so they match literally.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
