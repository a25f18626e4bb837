//! Cache-aside support: callers build a key that encodes every parameter
//! influencing the result, check the cache, and write back what they
//! computed. The layer performs no invalidation, locking or request
//! coalescing. Concurrent misses recompute independently and the last
//! write wins, which is safe because every cached computation here is
//! read-only and idempotent.
//!
//! Values are stored as serialized JSON. Store-native types (UUIDs,
//! timestamps) therefore come back in their canonical string form on a
//! hit, never rehydrated.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::metrics;

/// Byte-oriented cache boundary with a per-write TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}

/// What a cache outage means for the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// A cache failure aborts the whole operation.
    #[default]
    FailClosed,
    /// A cache failure degrades to a miss (read) or a no-op (write) and
    /// the live path serves the request.
    FailOpen,
}

/// Wraps a [`Cache`] with the process-wide TTL and serialization.
pub struct CacheAside<C> {
    cache: C,
    ttl: Duration,
    policy: CachePolicy,
}

impl<C: Cache> CacheAside<C> {
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self::with_policy(cache, ttl, CachePolicy::default())
    }

    pub fn with_policy(cache: C, ttl: Duration, policy: CachePolicy) -> Self {
        Self { cache, ttl, policy }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bytes = match self.cache.get(key).await {
            Ok(bytes) => bytes,
            Err(e) => match self.policy {
                CachePolicy::FailClosed => return Err(e),
                CachePolicy::FailOpen => {
                    tracing::warn!(
                        target: "marketlens::cache",
                        key,
                        error = %e,
                        "cache read failed, serving live"
                    );
                    None
                }
            },
        };
        match bytes {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    metrics::record_cache_hit();
                    Ok(Some(value))
                }
                Err(e) => {
                    // Undecodable entries count as misses; the recompute
                    // overwrites them.
                    tracing::warn!(
                        target: "marketlens::cache",
                        key,
                        error = %e,
                        "undecodable cache entry, treating as miss"
                    );
                    metrics::record_cache_miss();
                    Ok(None)
                }
            },
            None => {
                metrics::record_cache_miss();
                Ok(None)
            }
        }
    }

    pub async fn set_cached<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        match self.cache.set(key, bytes, self.ttl).await {
            Ok(()) => Ok(()),
            Err(e) => match self.policy {
                CachePolicy::FailClosed => Err(e),
                CachePolicy::FailOpen => {
                    tracing::warn!(
                        target: "marketlens::cache",
                        key,
                        error = %e,
                        "cache write failed, skipping"
                    );
                    Ok(())
                }
            },
        }
    }
}

struct MemoryEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache with passive expiry: entries are only dropped when a
/// read finds them expired. No eviction thread.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Shared cache backed by a Postgres table, for deployments where several
/// processes must see the same entries.
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "create table if not exists cache_entries (\
             key text primary key, \
             value bytea not null, \
             expires_at timestamptz not null)",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::cache)?;
        Ok(())
    }
}

#[async_trait]
impl Cache for PgCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar::<_, Vec<u8>>(
            "select value from cache_entries where key = $1 and expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::cache)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl).map_err(Error::cache)?;
        let expires_at = Utc::now() + ttl;
        sqlx::query(
            "insert into cache_entries (key, value, expires_at) values ($1, $2, $3) \
             on conflict (key) do update \
               set value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::cache)?;
        Ok(())
    }
}
