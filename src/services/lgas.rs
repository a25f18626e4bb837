use super::{Page, Services, page_number};
use crate::Document;
use crate::cache::Cache;
use crate::error::Result;
use crate::query::{Filter, Predicate, Query, SortDirection, SortSpec};
use crate::store::{DocumentStore, FindOptions};

const COLLECTION: &str = "lga_boundaries";

impl<S: DocumentStore, C: Cache> Services<S, C> {
    /// Paginated local-government-area list with an optional state filter,
    /// ordered by state then LGA name.
    pub async fn lgas(
        &self,
        skip: u64,
        limit: u64,
        state_code: Option<&str>,
    ) -> Result<Page<Document>> {
        let cache_key = format!("lgas_list_{}_{}_{}", skip, limit, state_code.unwrap_or("-"));
        if let Some(page) = self.cache.get_cached(&cache_key).await? {
            return Ok(page);
        }

        let filter = match state_code {
            Some(code) => Filter::from(Predicate::eq("state_code", code)),
            None => Filter::all(),
        };

        let total = self
            .store
            .find_many(COLLECTION, &filter, &FindOptions::new())
            .await?
            .len() as u64;
        let data = Query::new(&self.store, COLLECTION, filter)
            .skip(skip)
            .limit(limit)
            .sort(vec![
                SortSpec::text("state_name", SortDirection::Asc),
                SortSpec::text("lga_name", SortDirection::Asc),
            ])
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

    /// Single LGA by its unique code.
    pub async fn lga_by_code(&self, lga_code: &str) -> Result<Option<Document>> {
        let cache_key = format!("lga_{lga_code}");
        if let Some(doc) = self.cache.get_cached(&cache_key).await? {
            return Ok(Some(doc));
        }

        let found = Query::new(
            &self.store,
            COLLECTION,
            Filter::from(Predicate::eq("lga_code", lga_code)),
        )
        .execute_one()
        .await?;
        if let Some(ref doc) = found {
            self.cache.set_cached(&cache_key, doc).await?;
        }
        Ok(found)
    }
}
