use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::analytics::DateRange,
    application::repos::{AnalyticsRepo, RepoError},
    domain::entities::{DailyRevenue, OrderTotals, ProductRevenue, StatusCount},
    domain::types::OrderStatus,
};

use super::{PostgresRepositories, map_sqlx_error, naive_utc};

#[derive(sqlx::FromRow)]
struct TotalsRow {
    revenue_cents: i64,
    orders_count: i64,
}

#[derive(sqlx::FromRow)]
struct ProductRevenueRow {
    product_id: String,
    title: String,
    revenue_cents: i64,
    units: i64,
}

impl From<ProductRevenueRow> for ProductRevenue {
    fn from(row: ProductRevenueRow) -> Self {
        Self {
            product_id: row.product_id,
            title: row.title,
            revenue_cents: row.revenue_cents,
            units: row.units,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DailyRevenueRow {
    day: OffsetDateTime,
    revenue_cents: i64,
}

#[derive(sqlx::FromRow)]
struct StatusCountRow {
    status: String,
    count: i64,
}

fn revenue_statuses() -> Vec<&'static str> {
    OrderStatus::REVENUE.iter().map(|status| status.as_str()).collect()
}

#[async_trait]
impl AnalyticsRepo for PostgresRepositories {
    async fn order_totals(&self, range: &DateRange) -> Result<OrderTotals, RepoError> {
        let row = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT
                COALESCE(SUM(o."totalCents"), 0)::bigint AS revenue_cents,
                COUNT(*)::bigint AS orders_count
            FROM "Order" o
            WHERE o.status::text = ANY($1)
              AND o."orderDate" BETWEEN $2 AND $3
            "#,
        )
        .bind(revenue_statuses())
        .bind(naive_utc(range.from))
        .bind(naive_utc(range.to))
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(OrderTotals {
            revenue_cents: row.revenue_cents,
            orders_count: row.orders_count,
        })
    }

    async fn customer_count(&self) -> Result<i64, RepoError> {
        sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*)::bigint FROM "Customer""#)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn top_products(
        &self,
        range: &DateRange,
        limit: u32,
    ) -> Result<Vec<ProductRevenue>, RepoError> {
        let rows = sqlx::query_as::<_, ProductRevenueRow>(
            r#"
            SELECT
                p.id AS product_id,
                p.title AS title,
                SUM(oi.qty * oi."unitPriceCents")::bigint AS revenue_cents,
                SUM(oi.qty)::bigint AS units
            FROM "OrderItem" oi
            JOIN "Order" o ON o.id = oi."orderId"
            JOIN "Product" p ON p.id = oi."productId"
            WHERE o.status::text = ANY($1)
              AND o."orderDate" BETWEEN $2 AND $3
            GROUP BY p.id, p.title
            ORDER BY revenue_cents DESC, p.id
            LIMIT $4
            "#,
        )
        .bind(revenue_statuses())
        .bind(naive_utc(range.from))
        .bind(naive_utc(range.to))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn revenue_by_day(&self, range: &DateRange) -> Result<Vec<DailyRevenue>, RepoError> {
        let rows = sqlx::query_as::<_, DailyRevenueRow>(
            r#"
            SELECT
                (date_trunc('day', o."orderDate") AT TIME ZONE 'UTC') AS day,
                COALESCE(SUM(o."totalCents"), 0)::bigint AS revenue_cents
            FROM "Order" o
            WHERE o.status::text = ANY($1)
              AND o."orderDate" BETWEEN $2 AND $3
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(revenue_statuses())
        .bind(naive_utc(range.from))
        .bind(naive_utc(range.to))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| DailyRevenue {
                day: row.day,
                revenue_cents: row.revenue_cents,
            })
            .collect())
    }

    async fn orders_by_status(&self, range: &DateRange) -> Result<Vec<StatusCount>, RepoError> {
        let rows = sqlx::query_as::<_, StatusCountRow>(
            r#"
            SELECT o.status::text AS status, COUNT(*)::bigint AS count
            FROM "Order" o
            WHERE o."orderDate" BETWEEN $1 AND $2
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(naive_utc(range.from))
        .bind(naive_utc(range.to))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| StatusCount {
                status: row.status,
                count: row.count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revenue_statuses_exclude_unrealised_orders() {
        let statuses = revenue_statuses();
        assert_eq!(statuses, vec!["paid", "shipped", "delivered"]);
        assert!(!statuses.contains(&"pending"));
        assert!(!statuses.contains(&"refunded"));
    }
}
