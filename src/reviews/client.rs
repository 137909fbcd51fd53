use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::util::env::env_parse;

/// Cursor sentinel meaning "start of stream" for an app's review pages.
pub const START_CURSOR: &str = "*";
/// Records requested per page; the API caps at 100.
pub const PAGE_SIZE: u32 = 100;

const REVIEW_API_BASE: &str = "https://store.steampowered.com/appreviews";

/// One page of an app's review stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPage {
    /// 1 on success; anything else means the stream yielded nothing usable.
    #[serde(default)]
    pub success: i64,
    /// Token for the next page. Absent or repeated means the stream is done.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Opaque review objects, passed through unmodified.
    #[serde(default)]
    pub reviews: Vec<Value>,
}

/// Seam over the paginated review endpoint so harvest loops can run against
/// scripted pages in tests.
#[async_trait]
pub trait ReviewPageFetcher: Send + Sync {
    async fn fetch_page(&self, app_id: i64, cursor: &str) -> Result<ReviewPage>;
}

/// Live client for the Steam `appreviews` endpoint.
pub struct SteamReviewClient {
    client: Client,
}

impl SteamReviewClient {
    /// Request timeout follows `STEAM_HTTP_TIMEOUT_SECS` (default 15). A
    /// timed-out page ends that app's harvest like any transport failure.
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(env_parse("STEAM_HTTP_TIMEOUT_SECS", 15)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for SteamReviewClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewPageFetcher for SteamReviewClient {
    async fn fetch_page(&self, app_id: i64, cursor: &str) -> Result<ReviewPage> {
        // Cursors carry '+' and '=' and must survive the round trip intact.
        let url = format!(
            "{}/{}?json=1&cursor={}&language=english&filter=all&num_per_page={}",
            REVIEW_API_BASE,
            app_id,
            urlencoding::encode(cursor),
            PAGE_SIZE
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("review page request failed")?
            .error_for_status()
            .context("review page returned an error status")?;
        let page = response
            .json::<ReviewPage>()
            .await
            .context("review page body was not valid json")?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_review_page_payload() {
        let page: ReviewPage = serde_json::from_str(
            r#"{"success":1,"cursor":"AoJ4vI+fhvcCf8uYvAI=","reviews":[{"recommendationid":"123","timestamp_created":1700000000,"votes_up":3}]}"#,
        )
        .unwrap();
        assert_eq!(page.success, 1);
        assert_eq!(page.cursor.as_deref(), Some("AoJ4vI+fhvcCf8uYvAI="));
        assert_eq!(page.reviews.len(), 1);
    }

    #[test]
    fn missing_fields_default_to_empty_page() {
        let page: ReviewPage = serde_json::from_str(r#"{"success":0}"#).unwrap();
        assert_eq!(page.success, 0);
        assert!(page.cursor.is_none());
        assert!(page.reviews.is_empty());
    }
}
