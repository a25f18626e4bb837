use serde_json::{Value, json};

use super::{Page, Services, page_number};
use crate::Document;
use crate::cache::Cache;
use crate::error::Result;
use crate::query::{
    FacetSpec, Filter, Pipeline, PipelineStage, Predicate, Query, SortDirection, SortSpec,
};
use crate::store::DocumentStore;

const COLLECTION: &str = "product_categories";

impl<S: DocumentStore, C: Cache> Services<S, C> {
    /// Paginated category list. A single facet pipeline yields both the
    /// page slice and the total count in one store round trip.
    pub async fn categories(
        &self,
        skip: u64,
        limit: u64,
        product_category: Option<&str>,
    ) -> Result<Page<Document>> {
        let cache_key = format!(
            "categories_list_{}_{}_{}",
            skip,
            limit,
            product_category.unwrap_or("-")
        );
        if let Some(page) = self.cache.get_cached(&cache_key).await? {
            return Ok(page);
        }

        // Partial match, case-insensitive, when a pattern is given;
        // otherwise drop the placeholder categories.
        let filter = match product_category {
            Some(pattern) => Filter::from(Predicate::iregex("product_category", pattern)),
            None => Filter::from(Predicate::nin(
                "product_category",
                vec![Value::Null, json!("-")],
            )),
        };

        let rows = Pipeline::new(&self.store, COLLECTION)
            .filter(filter)
            .facet(
                FacetSpec::new()
                    .branch(
                        "data",
                        vec![
                            PipelineStage::Sort(vec![SortSpec::text(
                                "product_category",
                                SortDirection::Asc,
                            )]),
                            PipelineStage::Skip(skip),
                            PipelineStage::Limit(limit),
                        ],
                    )
                    .branch("total", vec![PipelineStage::Count("count".into())]),
            )
            .execute()
            .await?;

        let row = rows.into_iter().next().unwrap_or_else(|| json!({}));
        let total = row
            .get("total")
            .and_then(|branch| branch.get(0))
            .and_then(|entry| entry.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let data = row
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let page = Page {
            data,
            total,
            page: page_number(skip, limit),
            page_size: limit,
        };
        self.cache.set_cached(&cache_key, &page).await?;
        Ok(page)
    }

    /// Single category by its exact name.
    pub async fn category_by_name(&self, product_category: &str) -> Result<Option<Document>> {
        let cache_key = format!("category_{product_category}");
        if let Some(doc) = self.cache.get_cached(&cache_key).await? {
            return Ok(Some(doc));
        }

        let found = Query::new(
            &self.store,
            COLLECTION,
            Filter::from(Predicate::eq("product_category", product_category)),
        )
        .execute_one()
        .await?;
        if let Some(ref doc) = found {
            self.cache.set_cached(&cache_key, doc).await?;
        }
        Ok(found)
    }
}
