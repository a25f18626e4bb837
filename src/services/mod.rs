//! Read services over the retail-analytics collections. Each operation
//! follows the same shape: build a cache key from every parameter, check
//! the cache, run the builders on a miss, write the result back.

mod brands;
mod categories;
mod lgas;
mod sales;
mod states;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheAside};
use crate::store::DocumentStore;

/// Paginated response envelope shared by every list operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

pub(crate) fn page_number(skip: u64, limit: u64) -> u64 {
    if limit > 0 { skip / limit + 1 } else { 1 }
}

/// The service facade. Store and cache clients are injected once at
/// construction; one value serves many concurrent requests.
pub struct Services<S, C> {
    pub(crate) store: S,
    pub(crate) cache: CacheAside<C>,
}

impl<S: DocumentStore, C: Cache> Services<S, C> {
    pub fn new(store: S, cache: CacheAside<C>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &CacheAside<C> {
        &self.cache
    }
}
