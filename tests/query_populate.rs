use anyhow::Result;
use marketlens::prelude::*;
use marketlens::testing::{ensure_collection, seed_documents};
use serde_json::json;
use testcontainers::{
    GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use uuid::Uuid;

#[tokio::test]
async fn populate_substitutes_references_in_place() -> Result<()> {
    // spin up postgres
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
    for collection in [
        "state_boundaries_unit",
        "lga_boundaries",
        "state_boundaries",
        "tags",
    ] {
        ensure_collection(store.pool(), collection).await?;
    }

    let lga = Uuid::new_v4().to_string();
    let missing_state = Uuid::new_v4().to_string();
    let metric = Uuid::new_v4().to_string();
    let t1 = Uuid::new_v4().to_string();
    let t2 = Uuid::new_v4().to_string();
    let t3 = Uuid::new_v4().to_string();

    seed_documents(
        store.pool(),
        "lga_boundaries",
        &[json!({"id": &lga, "lga_name": "Ikeja"})],
    )
    .await?;
    seed_documents(
        store.pool(),
        "tags",
        &[
            json!({"id": &t1, "label": "fast-moving"}),
            json!({"id": &t3, "label": "seasonal"}),
        ],
    )
    .await?;
    seed_documents(
        store.pool(),
        "state_boundaries_unit",
        &[json!({
            "id": &metric,
            "lga": &lga,
            "state": &missing_state,
            "tags": [&t1, &t2, &t3],
            "units": 40,
        })],
    )
    .await?;

    let docs = store
        .query("state_boundaries_unit")
        .populate_into("lga", "lga_boundaries")
        .populate_into("state", "state_boundaries")
        .populate("tags")
        .execute()
        .await?;

    assert_eq!(docs.len(), 1);
    let doc = &docs[0];

    // scalar hit: the identifier became the full document
    assert_eq!(doc["lga"]["lga_name"], json!("Ikeja"));
    // scalar miss: the raw identifier is untouched
    assert_eq!(doc["state"], json!(&missing_state));
    // list: length and order preserved, unresolved id left as-is
    let tags = doc["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 3);
    assert_eq!(tags[0]["label"], json!("fast-moving"));
    assert_eq!(tags[1], json!(&t2));
    assert_eq!(tags[2]["label"], json!("seasonal"));

    // the single-document path resolves the same way
    let one = store
        .query("state_boundaries_unit")
        .filter(Filter::from(Predicate::eq("id", &metric)))
        .populate_into("lga", "lga_boundaries")
        .execute_one()
        .await?
        .expect("metric document");
    assert_eq!(one["lga"]["lga_name"], json!("Ikeja"));

    Ok(())
}

#[tokio::test]
async fn find_applies_sort_skip_and_limit() -> Result<()> {
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
    ensure_collection(store.pool(), "brands").await?;

    let names = ["Acme", "Mono", "Nadir", "Zenith"];
    let docs: Vec<_> = names
        .iter()
        .map(|name| json!({"id": Uuid::new_v4().to_string(), "brand_name": name}))
        .collect();
    seed_documents(store.pool(), "brands", &docs).await?;

    let page = store
        .query("brands")
        .sort(vec![SortSpec::text("brand_name", SortDirection::Asc)])
        .skip(1)
        .limit(2)
        .execute()
        .await?;

    let got: Vec<_> = page
        .iter()
        .map(|doc| doc["brand_name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(got, ["Mono", "Nadir"]);

    Ok(())
}
