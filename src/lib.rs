//! Shopsans: search and sales analytics over the store of record, served
//! through a shared response cache and per-client rate limits.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
