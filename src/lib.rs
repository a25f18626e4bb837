//! Marketlens — cached read-side query and aggregation core for retail
//! analytics, powered by Postgres.

pub mod cache;
mod error;
pub mod metrics;
pub mod populate;
pub mod query;
pub mod services;
pub mod store;
pub mod testing;

pub use error::{Error, Result, WithContext};

/// A schema-light document: a JSON object keyed by field name.
pub type Document = serde_json::Value;

/// The identifier field every persisted document carries; it is the join
/// key for population and the primary lookup key.
pub const ID_FIELD: &str = "id";

pub mod prelude {
    pub use crate::cache::{Cache, CacheAside, CachePolicy, MemoryCache, PgCache};
    pub use crate::query::{Filter, Pipeline, Predicate, Query, SortDirection, SortSpec};
    pub use crate::services::{Page, Services};
    pub use crate::store::{DocumentStore, FindOptions, Store};
    pub use crate::{Document, Error, Result};
}
