use anyhow::Result;
use marketlens::prelude::*;
use marketlens::query::{FacetSpec, GroupSpec, PipelineStage};
use marketlens::testing::{ensure_collection, seed_documents};
use serde_json::json;
use testcontainers::{
    GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use uuid::Uuid;

async fn seed_amounts(store: &Store, amounts: &[(i64, &str)]) -> Result<()> {
    ensure_collection(store.pool(), "sales").await?;
    let docs: Vec<_> = amounts
        .iter()
        .map(|(amount, state)| {
            json!({"id": Uuid::new_v4().to_string(), "amount": amount, "state": state})
        })
        .collect();
    seed_documents(store.pool(), "sales", &docs).await?;
    Ok(())
}

#[tokio::test]
async fn stage_order_is_observable() -> Result<()> {
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
    seed_amounts(
        &store,
        &[(1, "X"), (2, "X"), (3, "Y"), (4, "Y"), (5, "Y")],
    )
    .await?;

    let ascending_page = store
        .pipeline("sales")
        .sort(vec![SortSpec::numeric("amount", SortDirection::Asc)])
        .limit(2)
        .execute()
        .await?;
    let amounts: Vec<_> = ascending_page
        .iter()
        .map(|doc| doc["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, [1, 2]);

    // the limit applies to the already-sorted stream; a trailing sort
    // re-orders only the surviving two rows
    let re_sorted = store
        .pipeline("sales")
        .sort(vec![SortSpec::numeric("amount", SortDirection::Asc)])
        .limit(2)
        .sort(vec![SortSpec::numeric("amount", SortDirection::Desc)])
        .execute()
        .await?;
    let amounts: Vec<_> = re_sorted
        .iter()
        .map(|doc| doc["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, [2, 1]);

    let descending_page = store
        .pipeline("sales")
        .sort(vec![SortSpec::numeric("amount", SortDirection::Desc)])
        .limit(2)
        .execute()
        .await?;
    let amounts: Vec<_> = descending_page
        .iter()
        .map(|doc| doc["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, [5, 4]);

    Ok(())
}

#[tokio::test]
async fn group_accumulates_per_key() -> Result<()> {
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
    seed_amounts(&store, &[(10, "X"), (20, "X"), (5, "Y")]).await?;

    let rows = store
        .pipeline("sales")
        .group(
            GroupSpec::new()
                .by("state", "state")
                .sum("total", "amount")
                .count("orders"),
        )
        .sort(vec![SortSpec::text("state", SortDirection::Asc)])
        .execute()
        .await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["state"], json!("X"));
    assert_eq!(rows[0]["total"].as_f64(), Some(30.0));
    assert_eq!(rows[0]["orders"].as_i64(), Some(2));
    assert_eq!(rows[1]["state"], json!("Y"));
    assert_eq!(rows[1]["total"].as_f64(), Some(5.0));

    Ok(())
}

#[tokio::test]
async fn facet_total_is_independent_of_the_page_window() -> Result<()> {
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
    ensure_collection(store.pool(), "product_categories").await?;
    let names = ["Beverages", "Dairy", "Grains", "Produce", "Snacks"];
    let docs: Vec<_> = names
        .iter()
        .map(|name| json!({"id": Uuid::new_v4().to_string(), "product_category": name}))
        .collect();
    seed_documents(store.pool(), "product_categories", &docs).await?;

    for (skip, limit, expected) in [
        (0u64, 2u64, vec!["Beverages", "Dairy"]),
        (2, 2, vec!["Grains", "Produce"]),
        (4, 2, vec!["Snacks"]),
    ] {
        let rows = store
            .pipeline("product_categories")
            .filter(Filter::from(Predicate::exists("product_category")))
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

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["total"][0]["count"].as_i64(), Some(5));
        let got: Vec<_> = row["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|doc| doc["product_category"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(got, expected);
    }

    Ok(())
}
