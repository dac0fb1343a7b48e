//! Application services layer.

pub mod analytics;
pub mod error;
pub mod pagination;
pub mod repos;
pub mod search;
