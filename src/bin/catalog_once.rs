//! Catalog phase only: fetch the SteamSpy catalog and upsert game documents,
//! without touching reviews.
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use steam_data_pipeline::catalog;
use steam_data_pipeline::store::Store;
use steam_data_pipeline::util::env as env_util;

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let uri = env_util::mongo_uri().context("MONGO_URI must be set")?;
    let store = Store::connect(&uri).await?;
    store
        .ping()
        .await
        .context("unable to reach mongodb, check MONGO_URI")?;
    info!("mongodb connection successful");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(env_util::env_parse(
            "STEAM_HTTP_TIMEOUT_SECS",
            15,
        )))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let catalog = match catalog::fetch_catalog(&client).await {
        Some(catalog) => catalog,
        None => {
            error!("no catalog data retrieved, nothing to ingest");
            return Ok(());
        }
    };
    let summary = catalog::ingest_catalog(&store, &catalog).await;
    info!(
        upserted = summary.games_upserted,
        skipped = summary.games_skipped,
        "catalog ingestion complete"
    );
    Ok(())
}
