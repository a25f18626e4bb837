//! Fluent construction of single-collection reads and aggregation
//! pipelines. Builders are per-request values: configure by chaining,
//! then `execute` consumes the builder.

pub mod filter;
pub mod pipeline;

pub use filter::{Filter, JsonPath, Predicate, SortDirection, SortSpec};
pub use pipeline::{FacetSpec, GroupSpec, PipelineStage, ProjectSpec};

use crate::Document;
use crate::error::Result;
use crate::populate::{self, PopulateSpec};
use crate::store::{DocumentStore, FindOptions};

/// A single find with optional post-fetch reference expansion.
pub struct Query<'a, S: ?Sized> {
    store: &'a S,
    collection: String,
    filter: Filter,
    options: FindOptions,
    populates: Vec<PopulateSpec>,
}

impl<'a, S: DocumentStore + ?Sized> Query<'a, S> {
    pub fn new(store: &'a S, collection: impl Into<String>, filter: Filter) -> Self {
        Self {
            store,
            collection: collection.into(),
            filter,
            options: FindOptions::new(),
            populates: Vec::new(),
        }
    }

    /// Replace the filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the page size; calling again overwrites. `0` is unbounded.
    pub fn limit(mut self, n: u64) -> Self {
        self.options.limit = n;
        self
    }

    /// Set the number of leading matches to skip; calling again overwrites.
    pub fn skip(mut self, n: u64) -> Self {
        self.options.skip = n;
        self
    }

    /// Set the sort keys; calling again overwrites.
    pub fn sort(mut self, keys: Vec<SortSpec>) -> Self {
        self.options.sort = keys;
        self
    }

    /// Expand a reference field from the collection of the same name.
    pub fn populate(mut self, field: impl Into<String>) -> Self {
        self.populates.push(PopulateSpec::new(field));
        self
    }

    /// Expand a reference field from an explicitly named collection.
    pub fn populate_into(
        mut self,
        field: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        self.populates
            .push(PopulateSpec::into_collection(field, collection));
        self
    }

    /// Run the find, then expand any registered reference fields. An
    /// empty page returns as-is without touching the resolver.
    pub async fn execute(self) -> Result<Vec<Document>> {
        let mut docs = self
            .store
            .find_many(&self.collection, &self.filter, &self.options)
            .await?;
        if !docs.is_empty() && !self.populates.is_empty() {
            populate::resolve(self.store, &mut docs, &self.populates).await?;
        }
        Ok(docs)
    }

    /// Find a single document and expand its reference fields through the
    /// same batch resolver, treating it as a one-element page.
    pub async fn execute_one(self) -> Result<Option<Document>> {
        match self.store.find_one(&self.collection, &self.filter).await? {
            None => Ok(None),
            Some(doc) => {
                let mut batch = [doc];
                if !self.populates.is_empty() {
                    populate::resolve(self.store, &mut batch, &self.populates).await?;
                }
                let [doc] = batch;
                Ok(Some(doc))
            }
        }
    }
}

/// An ordered aggregation pipeline. Every call appends one stage; stage
/// order is preserved exactly as written.
pub struct Pipeline<'a, S: ?Sized> {
    store: &'a S,
    collection: String,
    stages: Vec<PipelineStage>,
}

impl<'a, S: DocumentStore + ?Sized> Pipeline<'a, S> {
    pub fn new(store: &'a S, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            stages: Vec::new(),
        }
    }

    /// Append a match stage.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.stages.push(PipelineStage::Match(filter));
        self
    }

    pub fn group(mut self, spec: GroupSpec) -> Self {
        self.stages.push(PipelineStage::Group(spec));
        self
    }

    pub fn sort(mut self, keys: Vec<SortSpec>) -> Self {
        self.stages.push(PipelineStage::Sort(keys));
        self
    }

    pub fn project(mut self, spec: ProjectSpec) -> Self {
        self.stages.push(PipelineStage::Project(spec));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.stages.push(PipelineStage::Skip(n));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.stages.push(PipelineStage::Limit(n));
        self
    }

    pub fn count(mut self, alias: impl Into<String>) -> Self {
        self.stages.push(PipelineStage::Count(alias.into()));
        self
    }

    pub fn facet(mut self, spec: FacetSpec) -> Self {
        self.stages.push(PipelineStage::Facet(spec));
        self
    }

    /// Escape hatch: append an arbitrary stage.
    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Run the pipeline and return the raw result documents. No automatic
    /// population is performed.
    pub async fn execute(self) -> Result<Vec<Document>> {
        self.store.aggregate(&self.collection, &self.stages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubStore;
    use serde_json::json;

    #[tokio::test]
    async fn limit_and_skip_overwrite_on_repeat_calls() {
        let store = StubStore::new();
        store.insert(
            "brands",
            vec![
                json!({"id": "b1", "brand_name": "Acme"}),
                json!({"id": "b2", "brand_name": "Zenith"}),
                json!({"id": "b3", "brand_name": "Mono"}),
            ],
        );

        let docs = Query::new(&store, "brands", Filter::all())
            .limit(10)
            .limit(1)
            .skip(5)
            .skip(1)
            .sort(vec![SortSpec::text("brand_name", SortDirection::Asc)])
            .execute()
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["brand_name"], json!("Mono"));
    }

    #[tokio::test]
    async fn empty_page_skips_the_resolver() {
        let store = StubStore::new();
        store.insert("brands", vec![]);

        let docs = Query::new(&store, "brands", Filter::all())
            .populate_into("lga", "lga_boundaries")
            .execute()
            .await
            .unwrap();

        assert!(docs.is_empty());
        // the find itself, and nothing for the registered field
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn execute_one_populates_through_the_batch_path() {
        let store = StubStore::new();
        store.insert(
            "sales",
            vec![json!({"id": "m1", "lga": "l1", "amount": 12})],
        );
        store.insert("lga_boundaries", vec![json!({"id": "l1", "lga_name": "Ikeja"})]);

        let doc = Query::new(&store, "sales", Filter::from(Predicate::eq("id", "m1")))
            .populate_into("lga", "lga_boundaries")
            .execute_one()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc["lga"]["lga_name"], json!("Ikeja"));
    }

    #[test]
    fn stages_keep_call_order() {
        let store = StubStore::new();
        let pipeline = Pipeline::new(&store, "sales")
            .filter(Filter::from(Predicate::exists("amount")))
            .group(GroupSpec::new().by("state", "state").sum("total", "amount"))
            .sort(vec![SortSpec::numeric("total", SortDirection::Desc)])
            .limit(5);

        let kinds: Vec<&'static str> = pipeline
            .stages()
            .iter()
            .map(|stage| match stage {
                PipelineStage::Match(_) => "match",
                PipelineStage::Group(_) => "group",
                PipelineStage::Sort(_) => "sort",
                PipelineStage::Limit(_) => "limit",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["match", "group", "sort", "limit"]);
    }
}
