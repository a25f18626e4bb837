use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    PgPool, Postgres, QueryBuilder as SqlBuilder,
    postgres::PgPoolOptions,
};
use tokio::time::{sleep, timeout};

use crate::error::{Error, Result};
use crate::metrics;
use crate::query::filter::{Filter, SortSpec};
use crate::query::pipeline::PipelineStage;
use crate::query::{Pipeline, Query};
use crate::Document;

mod sql;

pub use sql::quote_ident;

pub(crate) use sql::validate_collection;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// Options for a single find: skip, limit (0 = unbounded) and sort keys.
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub skip: u64,
    pub limit: u64,
    pub sort: Vec<SortSpec>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = n;
        self
    }

    pub fn sort(mut self, keys: Vec<SortSpec>) -> Self {
        self.sort = keys;
        self
    }
}

/// Read boundary of the document store: filtered finds and multi-stage
/// pipelines against named collections, returning materialized documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    async fn aggregate(
        &self,
        collection: &str,
        stages: &[PipelineStage],
    ) -> Result<Vec<Document>>;
}

/// Backoff envelope for transient store failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub total_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            total_deadline: Duration::from_secs(30),
        }
    }
}

/// Postgres-backed document store. Collections are tables of
/// `(id uuid primary key, doc jsonb not null)`; every read compiles to a
/// single SQL statement over the `doc` column.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    query_timeout: Duration,
    retry: RetryPolicy,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        })
    }

    pub fn builder(url: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(url)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a find builder against `collection` with a match-all filter.
    pub fn query(&self, collection: impl Into<String>) -> Query<'_, Store> {
        Query::new(self, collection, Filter::all())
    }

    /// Start an aggregation pipeline builder against `collection`.
    pub fn pipeline(&self, collection: impl Into<String>) -> Pipeline<'_, Store> {
        Pipeline::new(self, collection)
    }

    /// Lightweight liveness check for the connection pool.
    pub async fn pool_health(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("select 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    async fn run<F>(&self, collection: &str, mk: F) -> Result<Vec<Document>>
    where
        F: Fn() -> Result<SqlBuilder<'static, Postgres>>,
    {
        let deadline = Instant::now() + self.retry.total_deadline;
        let mut backoff = self.retry.initial_backoff;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let mut builder = mk()?;
            let sql_captured = builder.sql().to_string();
            let started = Instant::now();
            metrics::record_store_query();

            let fetched = timeout(
                self.query_timeout,
                builder.build_query_as::<(Value,)>().fetch_all(&self.pool),
            )
            .await;

            match fetched {
                Err(_) => {
                    metrics::record_store_timeout();
                    return Err(Error::QueryTimeout {
                        collection: collection.to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Ok(Ok(rows)) => {
                    let elapsed = started.elapsed();
                    if elapsed > SLOW_QUERY_THRESHOLD {
                        metrics::record_slow_query();
                        tracing::warn!(
                            target: "marketlens::slow_query",
                            elapsed_ms = elapsed.as_millis() as u64,
                            sql = %sql_captured,
                            "slow store query"
                        );
                    }
                    return Ok(rows.into_iter().map(|(value,)| value).collect());
                }
                Ok(Err(e)) => {
                    let err = Error::Db(e);
                    if err.is_transient() && Instant::now() + backoff < deadline {
                        metrics::record_store_retry();
                        tracing::debug!(
                            target: "marketlens::store",
                            error = %err,
                            backoff_ms = backoff.as_millis() as u64,
                            "transient store error, retrying"
                        );
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(self.retry.max_backoff);
                        continue;
                    }
                    return Err(if attempts > 1 {
                        Error::Unavailable {
                            attempts,
                            source: Box::new(err),
                        }
                    } else {
                        err
                    });
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for Store {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.run(collection, || sql::compile_find(collection, filter, options))
            .await
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let options = FindOptions::new().limit(1);
        let mut rows = self
            .run(collection, || sql::compile_find(collection, filter, &options))
            .await?;
        Ok(rows.pop())
    }

    async fn aggregate(
        &self,
        collection: &str,
        stages: &[PipelineStage],
    ) -> Result<Vec<Document>> {
        self.run(collection, || sql::compile_pipeline(collection, stages))
            .await
    }
}

pub struct StoreBuilder {
    url: String,
    max_connections: Option<u32>,
    connect_timeout: Option<Duration>,
    query_timeout: Duration,
    retry: RetryPolicy,
}

impl StoreBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            connect_timeout: None,
            query_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max.max(1));
        self
    }

    pub fn connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = Some(t);
        self
    }

    pub fn query_timeout(mut self, t: Duration) -> Self {
        self.query_timeout = t;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn build(self) -> Result<Store> {
        let mut opts = PgPoolOptions::new();
        if let Some(max) = self.max_connections {
            opts = opts.max_connections(max);
        }
        if let Some(t) = self.connect_timeout {
            opts = opts.acquire_timeout(t);
        }
        let pool = opts.connect(&self.url).await?;
        Ok(Store {
            pool,
            query_timeout: self.query_timeout,
            retry: self.retry,
        })
    }
}
