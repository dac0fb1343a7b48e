//! Shared domain enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Resource types reachable through the search cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Customers,
    Products,
    Tickets,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchKind::Customers => "customers",
            SearchKind::Products => "products",
            SearchKind::Tickets => "tickets",
        }
    }

    /// Text columns scanned by the substring fallback.
    pub fn substring_fields(self) -> &'static [&'static str] {
        match self {
            SearchKind::Customers => &["name", "email"],
            SearchKind::Products => &["title", "category"],
            SearchKind::Tickets => &["subject", "body"],
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "customers" => Ok(SearchKind::Customers),
            "products" => Ok(SearchKind::Products),
            "tickets" => Ok(SearchKind::Tickets),
            other => Err(DomainError::validation(format!(
                "unknown search type `{other}` (expected customers, products or tickets)"
            ))),
        }
    }
}

/// Which stage of the cascade produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Ranked,
    Fallback,
}

impl SearchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchSource::Ranked => "ranked",
            SearchSource::Fallback => "fallback",
        }
    }
}

/// Order lifecycle states as stored by the persistence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses whose totals count as realised revenue.
    pub const REVENUE: [OrderStatus; 3] = [
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_kind_parses_known_types() {
        assert_eq!("customers".parse::<SearchKind>().unwrap(), SearchKind::Customers);
        assert_eq!("products".parse::<SearchKind>().unwrap(), SearchKind::Products);
        assert_eq!("tickets".parse::<SearchKind>().unwrap(), SearchKind::Tickets);
        assert!("orders".parse::<SearchKind>().is_err());
    }

    #[test]
    fn search_source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SearchSource::Ranked).unwrap(),
            "\"ranked\""
        );
        assert_eq!(
            serde_json::to_string(&SearchSource::Fallback).unwrap(),
            "\"fallback\""
        );
    }
}
