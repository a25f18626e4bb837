use serde_json::{Value, json};

use super::{Page, Services, page_number};
use crate::Document;
use crate::cache::Cache;
use crate::error::Result;
use crate::query::{Filter, Predicate, Query, SortDirection, SortSpec};
use crate::store::{DocumentStore, FindOptions};

const COLLECTION: &str = "brands";

impl<S: DocumentStore, C: Cache> Services<S, C> {
    /// Paginated brand list. Without an explicit name the placeholder
    /// entries (`null` / `"-"`) are excluded.
    pub async fn brands(
        &self,
        skip: u64,
        limit: u64,
        brand_name: Option<&str>,
    ) -> Result<Page<Document>> {
        let cache_key = format!(
            "brands_list_{}_{}_{}",
            skip,
            limit,
            brand_name.unwrap_or("-")
        );
        if let Some(page) = self.cache.get_cached(&cache_key).await? {
            return Ok(page);
        }

        let filter = match brand_name {
            Some(name) => Filter::from(Predicate::eq("brand_name", name)),
            None => Filter::from(Predicate::nin(
                "brand_name",
                vec![Value::Null, json!("-")],
            )),
        };

        let total = self
            .store
            .find_many(COLLECTION, &filter, &FindOptions::new())
            .await?
            .len() as u64;
        let data = Query::new(&self.store, COLLECTION, filter)
            .skip(skip)
            .limit(limit)
            .sort(vec![SortSpec::text("brand_name", SortDirection::Asc)])
            .execute()
            .await?;

        let page = Page {
            data,
            total,
            page: page_number(skip, limit),
            page_size: limit,
        };
        self.cache.set_cached(&cache_key, &page).await?;
        Ok(page)
    }

    /// Single brand by its exact name.
    pub async fn brand_by_name(&self, brand_name: &str) -> Result<Option<Document>> {
        let cache_key = format!("brand_{brand_name}");
        if let Some(doc) = self.cache.get_cached(&cache_key).await? {
            return Ok(Some(doc));
        }

        let found = Query::new(
            &self.store,
            COLLECTION,
            Filter::from(Predicate::eq("brand_name", brand_name)),
        )
        .execute_one()
        .await?;
        if let Some(ref doc) = found {
            self.cache.set_cached(&cache_key, doc).await?;
        }
        Ok(found)
    }
}
