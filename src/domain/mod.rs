//! Domain records and enumerations shared by the cache, search and analytics layers.

pub mod entities;
pub mod error;
pub mod types;
