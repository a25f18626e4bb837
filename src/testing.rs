//! Test support: schema and seeding helpers for a real Postgres store,
//! and an in-memory [`StubStore`] that records calls and evaluates the
//! common predicate subset, for exercising builders, the resolver and
//! the cache-aside layer without a database.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ID_FIELD;
use crate::error::Result;
use crate::query::filter::{Filter, JsonPath, Predicate, SortDirection, SortKind, SortSpec};
use crate::query::pipeline::PipelineStage;
use crate::store::{DocumentStore, FindOptions, quote_ident, validate_collection};
use crate::Document;

/// Create a collection table if it does not exist yet.
pub async fn ensure_collection(pool: &PgPool, name: &str) -> Result<()> {
    validate_collection(name)?;
    let ddl = format!(
        "create table if not exists {} (id uuid primary key, doc jsonb not null)",
        quote_ident(name)
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Upsert documents into a collection, keyed by their `id` field (a
/// fresh UUID is assigned when the field is missing or malformed).
pub async fn seed_documents(pool: &PgPool, collection: &str, docs: &[Value]) -> Result<()> {
    validate_collection(collection)?;
    let sql = format!(
        "insert into {} (id, doc) values ($1, $2) \
         on conflict (id) do update set doc = excluded.doc",
        quote_ident(collection)
    );
    for doc in docs {
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);
        sqlx::query(&sql).bind(id).bind(doc).execute(pool).await?;
    }
    Ok(())
}

/// One recorded store call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubCall {
    pub collection: String,
    pub op: &'static str,
}

/// In-memory [`DocumentStore`] fake. Finds evaluate filters, sorts and
/// pagination against seeded documents; aggregation results are supplied
/// ahead of time with [`StubStore::push_aggregate_result`]. Every call is
/// recorded.
#[derive(Default)]
pub struct StubStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    aggregate_results: Mutex<VecDeque<Vec<Document>>>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: impl Into<String>, docs: Vec<Document>) {
        let mut collections = self.collections.lock().expect("stub lock poisoned");
        collections.entry(collection.into()).or_default().extend(docs);
    }

    /// Queue the result of the next `aggregate` call.
    pub fn push_aggregate_result(&self, docs: Vec<Document>) {
        self.aggregate_results
            .lock()
            .expect("stub lock poisoned")
            .push_back(docs);
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().expect("stub lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("stub lock poisoned").len()
    }

    fn record(&self, collection: &str, op: &'static str) {
        self.calls.lock().expect("stub lock poisoned").push(StubCall {
            collection: collection.to_string(),
            op,
        });
    }

    fn matching(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let collections = self.collections.lock().expect("stub lock poisoned");
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filter.predicates().iter().all(|p| eval(doc, p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for StubStore {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.record(collection, "find_many");
        let mut docs = self.matching(collection, filter);
        if !options.sort.is_empty() {
            docs.sort_by(|a, b| compare(a, b, &options.sort));
        }
        let skipped = docs.into_iter().skip(options.skip as usize);
        Ok(if options.limit > 0 {
            skipped.take(options.limit as usize).collect()
        } else {
            skipped.collect()
        })
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        self.record(collection, "find_one");
        Ok(self.matching(collection, filter).into_iter().next())
    }

    async fn aggregate(
        &self,
        collection: &str,
        _stages: &[PipelineStage],
    ) -> Result<Vec<Document>> {
        self.record(collection, "aggregate");
        Ok(self
            .aggregate_results
            .lock()
            .expect("stub lock poisoned")
            .pop_front()
            .unwrap_or_default())
    }
}

fn path_value<'v>(doc: &'v Value, path: &JsonPath) -> Option<&'v Value> {
    let mut current = doc;
    for part in path.parts() {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn eval(doc: &Value, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq { path, value } => path_value(doc, path) == Some(value),
        Predicate::Ne { path, value } => path_value(doc, path) != Some(value),
        Predicate::Gt { path, value } => {
            path_value(doc, path).and_then(numeric).is_some_and(|v| v > *value)
        }
        Predicate::Ge { path, value } => {
            path_value(doc, path).and_then(numeric).is_some_and(|v| v >= *value)
        }
        Predicate::Lt { path, value } => {
            path_value(doc, path).and_then(numeric).is_some_and(|v| v < *value)
        }
        Predicate::Le { path, value } => {
            path_value(doc, path).and_then(numeric).is_some_and(|v| v <= *value)
        }
        Predicate::GeText { path, value } => path_value(doc, path)
            .and_then(Value::as_str)
            .is_some_and(|v| v >= value.as_str()),
        Predicate::LeText { path, value } => path_value(doc, path)
            .and_then(Value::as_str)
            .is_some_and(|v| v <= value.as_str()),
        Predicate::In { path, values } => {
            let found = path_value(doc, path).cloned().unwrap_or(Value::Null);
            values.contains(&found)
        }
        Predicate::Nin { path, values } => {
            let found = path_value(doc, path).cloned().unwrap_or(Value::Null);
            !values.contains(&found)
        }
        Predicate::Exists(path) => path_value(doc, path).is_some(),
        Predicate::Regex { .. } => {
            panic!("regex predicates are not supported by StubStore")
        }
        Predicate::Between { path, low, high } => path_value(doc, path)
            .and_then(numeric)
            .is_some_and(|v| v >= *low && v <= *high),
        Predicate::Not(inner) => !eval(doc, inner),
        Predicate::And(predicates) => predicates.iter().all(|p| eval(doc, p)),
        Predicate::Or(predicates) => predicates.iter().any(|p| eval(doc, p)),
    }
}

fn compare(a: &Value, b: &Value, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ordering = match spec.kind {
            SortKind::Text(direction) => {
                let av = path_value(a, &spec.path).and_then(Value::as_str);
                let bv = path_value(b, &spec.path).and_then(Value::as_str);
                directed(av.cmp(&bv), direction)
            }
            SortKind::Numeric(direction) => {
                let av = path_value(a, &spec.path).and_then(numeric);
                let bv = path_value(b, &spec.path).and_then(numeric);
                directed(
                    av.partial_cmp(&bv).unwrap_or(Ordering::Equal),
                    direction,
                )
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}
