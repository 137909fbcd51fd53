//! Catalog phase: one-shot SteamSpy fetch, per-entry cleanup, sequential
//! upserts into `game_infos`. Runs to completion before any review work.
pub mod transform;

use indexmap::IndexMap;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::store::Store;
use transform::{build_game_record, CatalogEntry};

pub const STEAMSPY_API_URL: &str = "https://steamspy.com/api.php?request=all";

/// Fetch the complete game dataset from SteamSpy. Transport and decode
/// failures are logged and yield `None`; the caller decides what can still
/// run without a catalog.
pub async fn fetch_catalog(client: &Client) -> Option<IndexMap<String, CatalogEntry>> {
    info!("retrieving game catalog from steamspy");
    let response = match client
        .get(STEAMSPY_API_URL)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(response) => response,
        Err(error) => {
            error!(error = %error, "unable to retrieve steamspy catalog");
            return None;
        }
    };
    match response.json::<IndexMap<String, CatalogEntry>>().await {
        Ok(catalog) => {
            info!(games = catalog.len(), "steamspy catalog retrieved");
            Some(catalog)
        }
        Err(error) => {
            error!(error = %error, "steamspy catalog body was not valid json");
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct CatalogIngestSummary {
    pub games_upserted: usize,
    pub games_skipped: usize,
}

/// Sequential transform-and-upsert pass over the catalog. Per-entry failures
/// are logged and skipped; the loop always runs to completion.
pub async fn ingest_catalog(
    store: &Store,
    catalog: &IndexMap<String, CatalogEntry>,
) -> CatalogIngestSummary {
    let mut summary = CatalogIngestSummary::default();
    for (raw_id, entry) in catalog {
        let app_id: i64 = match raw_id.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(key = %raw_id, "catalog key is not a numeric app id");
                summary.games_skipped += 1;
                continue;
            }
        };
        let record = build_game_record(app_id, entry);
        if let Err(error) = store.upsert_game(&record).await {
            error!(
                app_id,
                name = record.name.as_deref().unwrap_or("<unnamed>"),
                error = %error,
                "unable to upsert game"
            );
            summary.games_skipped += 1;
            continue;
        }
        summary.games_upserted += 1;
        if summary.games_upserted % 1000 == 0 {
            info!(
                processed = summary.games_upserted,
                total = catalog.len(),
                "catalog ingest progress"
            );
        }
    }
    summary
}

/// App ids for the review phase, in catalog order. Non-numeric keys were
/// already reported by `ingest_catalog`.
pub fn catalog_app_ids(catalog: &IndexMap<String, CatalogEntry>) -> Vec<i64> {
    catalog.keys().filter_map(|key| key.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_ids_follow_catalog_order_and_skip_bad_keys() {
        let mut catalog: IndexMap<String, CatalogEntry> = IndexMap::new();
        catalog.insert("570".into(), CatalogEntry::default());
        catalog.insert("not-an-id".into(), CatalogEntry::default());
        catalog.insert("10".into(), CatalogEntry::default());
        assert_eq!(catalog_app_ids(&catalog), vec![570, 10]);
    }
}
