//! Review phase only, for an explicit app id list.
//! Env: STEAM_APP_IDS (comma list, required), plus the usual review knobs.
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use steam_data_pipeline::reviews::{dispatch, DispatchOptions, HarvestOptions, SteamReviewClient};
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

    let app_ids: Vec<i64> = env_util::env_req("STEAM_APP_IDS")?
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if app_ids.is_empty() {
        bail!("STEAM_APP_IDS contained no numeric app ids");
    }

    let uri = env_util::mongo_uri().context("MONGO_URI must be set")?;
    let store = Store::connect(&uri).await?;
    store
        .ping()
        .await
        .context("unable to reach mongodb, check MONGO_URI")?;
    info!("mongodb connection successful");

    let options = DispatchOptions {
        worker_count: env_util::env_parse("STEAM_REVIEW_WORKERS", 15),
        harvest: HarvestOptions {
            target_count: env_util::env_parse("STEAM_REVIEW_TARGET", 1000),
            window_months: env_util::env_parse("STEAM_REVIEW_WINDOW_MONTHS", 3),
            page_delay: Duration::from_millis(env_util::env_parse("STEAM_PAGE_DELAY_MS", 1000)),
        },
    };
    info!(apps = app_ids.len(), workers = options.worker_count, "starting review harvest");
    let fetcher = SteamReviewClient::new();
    let summary = dispatch(&fetcher, &store, &app_ids, &options).await;
    info!(
        apps = summary.apps,
        reviews_collected = summary.reviews_collected,
        reviews_persisted = summary.reviews_persisted,
        persist_failures = summary.persist_failures,
        "review harvest complete"
    );
    Ok(())
}
