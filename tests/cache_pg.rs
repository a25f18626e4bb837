use std::time::Duration;

use anyhow::Result;
use marketlens::prelude::*;
use serde_json::{Value, json};
use testcontainers::{
    GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

#[tokio::test]
async fn shared_cache_round_trip_and_expiry() -> Result<()> {
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    let cache = PgCache::new(store.pool().clone());
    cache.ensure_schema().await?;

    let aside = CacheAside::new(cache, Duration::from_secs(3600));
    let payload = json!({
        "data": [{"id": "b1", "brand_name": "Acme"}],
        "total": 1,
        "page": 1,
        "page_size": 10,
    });

    // miss, write, hit: the hit is byte-identical to what was stored
    let miss: Option<Value> = aside.get_cached("brands_list_0_10_-").await?;
    assert_eq!(miss, None);
    aside.set_cached("brands_list_0_10_-", &payload).await?;
    let hit: Value = aside
        .get_cached("brands_list_0_10_-")
        .await?
        .expect("cached entry");
    assert_eq!(
        serde_json::to_vec(&hit)?,
        serde_json::to_vec(&payload)?
    );

    // overwrite wins
    aside.set_cached("brands_list_0_10_-", &json!({"total": 2})).await?;
    let hit: Value = aside
        .get_cached("brands_list_0_10_-")
        .await?
        .expect("cached entry");
    assert_eq!(hit["total"].as_i64(), Some(2));

    // a zero TTL writes an already-expired entry: the next read misses
    let expired = CacheAside::new(PgCache::new(store.pool().clone()), Duration::ZERO);
    expired.set_cached("gone", &json!(1)).await?;
    let miss: Option<Value> = expired.get_cached("gone").await?;
    assert_eq!(miss, None);

    Ok(())
}
