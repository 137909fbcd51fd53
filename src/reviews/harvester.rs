use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;

use super::client::{ReviewPageFetcher, START_CURSOR};

/// Tunables for one app's harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Stop requesting further pages once this many records are collected.
    pub target_count: usize,
    /// Keep reviews created within the last `window_months` x 30 days.
    pub window_months: i64,
    /// Politeness pause between page requests; zero disables it.
    pub page_delay: Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            target_count: 1000,
            window_months: 3,
            page_delay: Duration::from_secs(1),
        }
    }
}

/// Why a harvest loop ended. Every variant is normal completion; partial
/// results are returned, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestStop {
    /// Enough records were collected before requesting another page.
    TargetReached,
    /// Upstream reported failure, ran out of records, or stopped handing out
    /// a cursor.
    Exhausted,
    /// A page ended older than the cutoff window; later pages are older still.
    CutoffReached,
    /// The same cursor came back twice in a row.
    NoProgress,
    /// A page request failed or timed out.
    TransportError,
}

/// Records collected for one app plus the terminal state that ended the loop.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub reviews: Vec<Value>,
    pub stop: HarvestStop,
}

/// Start of the cutoff window: `now` minus `window_months` 30-day units.
pub fn cutoff_start(now: DateTime<Utc>, window_months: i64) -> DateTime<Utc> {
    now - chrono::Duration::days(window_months * 30)
}

/// Collect up to `target_count` in-window reviews for one app, page by page.
///
/// Each kept record gets an `app_id` field attached before collection. A page
/// is always filtered in full, so the result may exceed the target by up to
/// one page of matching records.
///
/// Precondition: pages arrive reverse-chronological. The early stop on a
/// stale page tail assumes every later page is stale as well.
pub async fn harvest(
    fetcher: &dyn ReviewPageFetcher,
    app_id: i64,
    options: &HarvestOptions,
) -> HarvestOutcome {
    let cutoff = cutoff_start(Utc::now(), options.window_months).timestamp();
    let mut collected: Vec<Value> = Vec::new();
    let mut cursor = START_CURSOR.to_string();

    let stop = loop {
        if collected.len() >= options.target_count {
            break HarvestStop::TargetReached;
        }

        let page = match fetcher.fetch_page(app_id, &cursor).await {
            Ok(page) => page,
            Err(error) => {
                warn!(app_id, error = %error, "review page fetch failed, keeping partial harvest");
                break HarvestStop::TransportError;
            }
        };
        if page.success != 1 || page.reviews.is_empty() {
            break HarvestStop::Exhausted;
        }

        let last_created = page.reviews.last().and_then(timestamp_created);
        for mut review in page.reviews {
            match timestamp_created(&review) {
                Some(created) if created >= cutoff => {}
                _ => continue,
            }
            if let Some(fields) = review.as_object_mut() {
                fields.insert("app_id".to_string(), json!(app_id));
                collected.push(review);
            }
        }

        // One stale page tail means every following page is stale too.
        if matches!(last_created, Some(created) if created < cutoff) {
            break HarvestStop::CutoffReached;
        }

        match page.cursor {
            Some(next) if next == cursor => break HarvestStop::NoProgress,
            Some(next) if !next.is_empty() => cursor = next,
            _ => break HarvestStop::Exhausted,
        }

        if !options.page_delay.is_zero() {
            tokio::time::sleep(options.page_delay).await;
        }
    };

    HarvestOutcome {
        reviews: collected,
        stop,
    }
}

fn timestamp_created(review: &Value) -> Option<i64> {
    review.get("timestamp_created").and_then(Value::as_i64)
}
