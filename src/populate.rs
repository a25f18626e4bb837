//! Reference expansion over pages of documents.
//!
//! A reference field holds one identifier or a list of identifiers
//! pointing into a target collection. Resolution batches every identifier
//! seen across the page into a single find per field and substitutes the
//! fetched documents in place. An identifier with no matching document is
//! left untouched: resolution is a substitution, never a filter.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::future::try_join_all;
use serde_json::Value;

use crate::Document;
use crate::ID_FIELD;
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::filter::{Filter, Predicate};
use crate::store::{DocumentStore, FindOptions};

/// A registered reference field and the collection its identifiers
/// point into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulateSpec {
    pub field: String,
    pub collection: String,
}

impl PopulateSpec {
    /// Reference a collection named after the field itself.
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            collection: field.clone(),
            field,
        }
    }

    pub fn into_collection(field: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            collection: collection.into(),
        }
    }
}

/// Resolve every registered field across `docs`, issuing at most one
/// store round trip per distinct field. Per-field fetches run
/// concurrently; substitution happens only once every mapping is
/// complete, so a failed fetch for any field fails the whole call.
pub async fn resolve<S>(store: &S, docs: &mut [Document], specs: &[PopulateSpec]) -> Result<()>
where
    S: DocumentStore + ?Sized,
{
    if docs.is_empty() || specs.is_empty() {
        return Ok(());
    }

    // Duplicate registrations collapse; the last target collection wins.
    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for spec in specs {
        fields.insert(spec.field.as_str(), spec.collection.as_str());
    }

    let mut lookups: Vec<(&str, &str, BTreeSet<String>)> = Vec::new();
    for (field, collection) in fields {
        let mut candidates = BTreeSet::new();
        for doc in docs.iter() {
            match doc.get(field) {
                Some(Value::String(id)) => {
                    candidates.insert(id.clone());
                }
                Some(Value::Array(ids)) => {
                    for id in ids {
                        if let Value::String(id) = id {
                            candidates.insert(id.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        if !candidates.is_empty() {
            lookups.push((field, collection, candidates));
        }
    }

    let resolved = try_join_all(lookups.into_iter().map(
        |(field, collection, candidates)| async move {
            metrics::record_populate_fetch();
            let filter = Filter::from(Predicate::is_in(ID_FIELD, candidates));
            let referenced = store
                .find_many(collection, &filter, &FindOptions::new())
                .await?;
            let mut by_id = HashMap::with_capacity(referenced.len());
            for doc in referenced {
                if let Some(id) = doc.get(ID_FIELD).and_then(Value::as_str) {
                    by_id.insert(id.to_string(), doc);
                }
            }
            Ok::<_, Error>((field, by_id))
        },
    ))
    .await?;

    for (field, by_id) in &resolved {
        for doc in docs.iter_mut() {
            let Some(value) = doc.get_mut(*field) else {
                continue;
            };
            match value {
                Value::String(id) => {
                    if let Some(found) = by_id.get(id.as_str()) {
                        *value = found.clone();
                    }
                }
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if let Value::String(id) = item {
                            if let Some(found) = by_id.get(id.as_str()) {
                                *item = found.clone();
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubStore;
    use serde_json::json;

    #[tokio::test]
    async fn absent_field_issues_no_round_trip() {
        let store = StubStore::new();
        let mut docs = vec![json!({"id": "a", "name": "one"})];

        resolve(&store, &mut docs, &[PopulateSpec::new("lga")])
            .await
            .unwrap();

        assert_eq!(store.call_count(), 0);
        assert_eq!(docs[0], json!({"id": "a", "name": "one"}));
    }

    #[tokio::test]
    async fn list_substitution_preserves_length_and_order() {
        let store = StubStore::new();
        store.insert(
            "tags",
            vec![
                json!({"id": "t1", "label": "first"}),
                json!({"id": "t3", "label": "third"}),
            ],
        );
        let mut docs = vec![json!({"id": "a", "tags": ["t1", "t2", "t3"]})];

        resolve(&store, &mut docs, &[PopulateSpec::new("tags")])
            .await
            .unwrap();

        let tags = docs[0]["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], json!({"id": "t1", "label": "first"}));
        assert_eq!(tags[1], json!("t2"));
        assert_eq!(tags[2], json!({"id": "t3", "label": "third"}));
    }

    #[tokio::test]
    async fn scalar_hit_replaces_and_miss_is_untouched() {
        let store = StubStore::new();
        store.insert("lga_boundaries", vec![json!({"id": "l1", "lga_name": "Ikeja"})]);
        let mut docs = vec![
            json!({"id": "a", "lga": "l1"}),
            json!({"id": "b", "lga": "l9"}),
        ];

        resolve(
            &store,
            &mut docs,
            &[PopulateSpec::into_collection("lga", "lga_boundaries")],
        )
        .await
        .unwrap();

        assert_eq!(docs[0]["lga"], json!({"id": "l1", "lga_name": "Ikeja"}));
        assert_eq!(docs[1]["lga"], json!("l9"));
    }

    #[tokio::test]
    async fn duplicate_registrations_issue_one_round_trip() {
        let store = StubStore::new();
        store.insert("periods", vec![json!({"id": "p1", "start_date": "2024-01-01"})]);
        let mut docs = vec![
            json!({"id": "a", "date": "p1"}),
            json!({"id": "b", "date": ["p1"]}),
        ];

        resolve(
            &store,
            &mut docs,
            &[
                PopulateSpec::into_collection("date", "periods"),
                PopulateSpec::into_collection("date", "periods"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(store.call_count(), 1);
        assert_eq!(docs[0]["date"]["start_date"], json!("2024-01-01"));
        assert_eq!(docs[1]["date"][0]["start_date"], json!("2024-01-01"));
    }

    #[tokio::test]
    async fn fields_resolve_independently() {
        let store = StubStore::new();
        store.insert("lga_boundaries", vec![json!({"id": "l1", "lga_name": "Ikeja"})]);
        store.insert("state_boundaries", vec![json!({"id": "s1", "state_name": "Lagos"})]);
        let mut docs = vec![json!({"id": "a", "lga": "l1", "state": "s1"})];

        resolve(
            &store,
            &mut docs,
            &[
                PopulateSpec::into_collection("lga", "lga_boundaries"),
                PopulateSpec::into_collection("state", "state_boundaries"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(store.call_count(), 2);
        assert_eq!(docs[0]["lga"]["lga_name"], json!("Ikeja"));
        assert_eq!(docs[0]["state"]["state_name"], json!("Lagos"));
    }
}
