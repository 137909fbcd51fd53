use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use steam_data_pipeline::catalog::{self, catalog_app_ids};
use steam_data_pipeline::reviews::{dispatch, DispatchOptions, HarvestOptions, SteamReviewClient};
use steam_data_pipeline::store::Store;
use steam_data_pipeline::util::env as env_util;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn catalog_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(env_util::env_parse(
            "STEAM_HTTP_TIMEOUT_SECS",
            15,
        )))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn dispatch_options() -> DispatchOptions {
    DispatchOptions {
        worker_count: env_util::env_parse("STEAM_REVIEW_WORKERS", 15),
        harvest: HarvestOptions {
            target_count: env_util::env_parse("STEAM_REVIEW_TARGET", 1000),
            window_months: env_util::env_parse("STEAM_REVIEW_WINDOW_MONTHS", 3),
            page_delay: Duration::from_millis(env_util::env_parse("STEAM_PAGE_DELAY_MS", 1000)),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing();

    let uri = env_util::mongo_uri().context("MONGO_URI must be set before ingestion can run")?;
    let store = Store::connect(&uri).await?;
    store
        .ping()
        .await
        .context("unable to reach mongodb, check MONGO_URI")?;
    info!("mongodb connection successful");

    // Phase 1: catalog, strictly sequential. Without a catalog there is no
    // app id list, so the review phase cannot run either.
    let catalog = match catalog::fetch_catalog(&catalog_http_client()).await {
        Some(catalog) => catalog,
        None => {
            error!("no catalog data retrieved, nothing to ingest");
            return Ok(());
        }
    };
    info!(games = catalog.len(), "starting catalog ingestion");
    let games = catalog::ingest_catalog(&store, &catalog).await;
    info!(
        upserted = games.games_upserted,
        skipped = games.games_skipped,
        "catalog ingestion complete"
    );

    // Phase 2: reviews, fanned out across the worker pool.
    let app_ids = catalog_app_ids(&catalog);
    info!(apps = app_ids.len(), "starting review harvest");
    let fetcher = SteamReviewClient::new();
    let summary = dispatch(&fetcher, &store, &app_ids, &dispatch_options()).await;
    info!(
        apps = summary.apps,
        reviews_collected = summary.reviews_collected,
        reviews_persisted = summary.reviews_persisted,
        persist_failures = summary.persist_failures,
        "review harvest complete"
    );
    Ok(())
}
