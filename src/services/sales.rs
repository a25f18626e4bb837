use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Page, Services, page_number};
use crate::cache::Cache;
use crate::error::Result;
use crate::query::{Filter, Predicate, Query, SortDirection, SortSpec};
use crate::store::{DocumentStore, FindOptions};
use crate::{Document, ID_FIELD};

const COLLECTION: &str = "state_boundaries_unit";

impl<S: DocumentStore, C: Cache> Services<S, C> {
    /// Sales metrics filtered by reporting-period date range and/or
    /// location, with the `lga` and `state` references expanded from
    /// their boundary collections.
    pub async fn sales_metrics(
        &self,
        skip: u64,
        limit: u64,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        lga_id: Option<&str>,
        state_id: Option<&str>,
    ) -> Result<Page<Document>> {
        let cache_key = format!(
            "sales_metrics_{}_{}_{}_{}_{}_{}",
            skip,
            limit,
            start_date.map_or_else(|| "-".into(), |d| d.to_rfc3339()),
            end_date.map_or_else(|| "-".into(), |d| d.to_rfc3339()),
            lga_id.unwrap_or("-"),
            state_id.unwrap_or("-"),
        );
        if let Some(page) = self.cache.get_cached(&cache_key).await? {
            return Ok(page);
        }

        // Date filters go through the periods collection first; metrics
        // reference a period by id in their `date` field.
        let mut period_filter = Filter::new();
        if let Some(start) = start_date {
            period_filter = period_filter.and(Predicate::ge_text("start_date", start.to_rfc3339()));
        }
        if let Some(end) = end_date {
            period_filter = period_filter.and(Predicate::le_text("end_date", end.to_rfc3339()));
        }
        let period_ids: Vec<String> = if period_filter.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_many("periods", &period_filter, &FindOptions::new())
                .await?
                .iter()
                .filter_map(|period| period.get(ID_FIELD).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        };

        let mut filter = Filter::new();
        if !period_ids.is_empty() {
            filter = filter.and(Predicate::is_in("date", period_ids));
        }
        if let Some(lga) = lga_id {
            filter = filter.and(Predicate::eq("lga", lga));
        }
        if let Some(state) = state_id {
            filter = filter.and(Predicate::eq("state", state));
        }

        let total = self
            .store
            .find_many(COLLECTION, &filter, &FindOptions::new())
            .await?
            .len() as u64;
        let data = Query::new(&self.store, COLLECTION, filter)
            .skip(skip)
            .limit(limit)
            .sort(vec![SortSpec::text("date", SortDirection::Asc)])
            .populate_into("lga", "lga_boundaries")
            .populate_into("state", "state_boundaries")
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
}
