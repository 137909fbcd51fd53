use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::client::ReviewPageFetcher;
use super::harvester::{harvest, HarvestOptions, HarvestStop};

/// Seam over the review persistence path; `Store` provides the real one.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    /// Persist one app's harvested reviews as a single bulk upsert.
    /// Returns the number of upsert operations submitted.
    async fn persist_reviews(&self, reviews: &[Value]) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Apps harvested concurrently. All app ids are enqueued immediately;
    /// the semaphore bounds how many run at once.
    pub worker_count: usize,
    pub harvest: HarvestOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            worker_count: 15,
            harvest: HarvestOptions::default(),
        }
    }
}

/// What happened to a single app id.
#[derive(Debug)]
pub struct AppOutcome {
    pub app_id: i64,
    pub stop: HarvestStop,
    pub collected: usize,
    pub persisted: u64,
    pub persist_error: Option<String>,
}

/// Batch outcome aggregated across all app ids, in completion order.
#[derive(Debug, Default)]
pub struct ReviewIngestSummary {
    pub apps: usize,
    pub reviews_collected: usize,
    pub reviews_persisted: u64,
    pub persist_failures: usize,
    pub stops: HashMap<HarvestStop, usize>,
}

impl ReviewIngestSummary {
    fn record(&mut self, outcome: &AppOutcome) {
        self.apps += 1;
        self.reviews_collected += outcome.collected;
        self.reviews_persisted += outcome.persisted;
        if outcome.persist_error.is_some() {
            self.persist_failures += 1;
        }
        *self.stops.entry(outcome.stop).or_insert(0) += 1;
    }
}

/// Fan the harvest across all app ids on a bounded worker pool, funnelling
/// each app's records into one bulk persist call. Failures are contained at
/// the per-app boundary: a harvest or persist error never aborts the batch,
/// and no ordering is guaranteed across apps.
pub async fn dispatch(
    fetcher: &dyn ReviewPageFetcher,
    sink: &dyn ReviewSink,
    app_ids: &[i64],
    options: &DispatchOptions,
) -> ReviewIngestSummary {
    let semaphore = Arc::new(Semaphore::new(options.worker_count.max(1)));
    let mut workers: FuturesUnordered<_> = FuturesUnordered::new();
    for &app_id in app_ids {
        let semaphore = semaphore.clone();
        let harvest_options = options.harvest.clone();
        workers.push(async move {
            let _permit = semaphore.acquire_owned().await.unwrap();
            let harvested = harvest(fetcher, app_id, &harvest_options).await;
            let mut outcome = AppOutcome {
                app_id,
                stop: harvested.stop,
                collected: harvested.reviews.len(),
                persisted: 0,
                persist_error: None,
            };
            // Empty harvests issue no bulk call at all.
            if harvested.reviews.is_empty() {
                return outcome;
            }
            match sink.persist_reviews(&harvested.reviews).await {
                Ok(written) => outcome.persisted = written,
                Err(err) => {
                    error!(app_id, error = %err, "unable to persist harvested reviews");
                    outcome.persist_error = Some(err.to_string());
                }
            }
            outcome
        });
    }

    let total = app_ids.len();
    let mut summary = ReviewIngestSummary::default();
    while let Some(outcome) = workers.next().await {
        summary.record(&outcome);
        if summary.apps % 100 == 0 || summary.apps == total {
            info!(
                processed = summary.apps,
                total,
                reviews = summary.reviews_collected,
                "review harvest progress"
            );
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{anyhow, bail};
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::super::client::ReviewPage;
    use super::*;

    fn fresh_review(app_tag: i64, n: i64) -> Value {
        json!({
            "recommendationid": format!("{app_tag}-{n}"),
            "timestamp_created": Utc::now().timestamp() - 60,
        })
    }

    fn quick_options(workers: usize) -> DispatchOptions {
        DispatchOptions {
            worker_count: workers,
            harvest: HarvestOptions {
                target_count: 1000,
                window_months: 3,
                page_delay: Duration::ZERO,
            },
        }
    }

    /// One exhausted page of two reviews per app; one app id always fails.
    struct OnePageFetcher {
        failing_app: i64,
    }

    #[async_trait]
    impl ReviewPageFetcher for OnePageFetcher {
        async fn fetch_page(&self, app_id: i64, _cursor: &str) -> Result<ReviewPage> {
            if app_id == self.failing_app {
                bail!("connection reset by peer");
            }
            Ok(ReviewPage {
                success: 1,
                cursor: None,
                reviews: vec![fresh_review(app_id, 0), fresh_review(app_id, 1)],
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl ReviewSink for RecordingSink {
        async fn persist_reviews(&self, reviews: &[Value]) -> Result<u64> {
            self.batches.lock().await.push(reviews.to_vec());
            Ok(reviews.len() as u64)
        }
    }

    fn batch_app_ids(batch: &[Value]) -> Vec<i64> {
        batch
            .iter()
            .filter_map(|r| r.get("app_id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn one_failing_app_does_not_abort_the_others() {
        let fetcher = OnePageFetcher { failing_app: 2 };
        let sink = RecordingSink::default();

        let summary = dispatch(&fetcher, &sink, &[1, 2, 3], &quick_options(2)).await;

        assert_eq!(summary.apps, 3);
        assert_eq!(summary.reviews_persisted, 4);
        assert_eq!(summary.persist_failures, 0);
        assert_eq!(summary.stops.get(&HarvestStop::TransportError), Some(&1));
        assert_eq!(summary.stops.get(&HarvestStop::Exhausted), Some(&2));

        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 2);
        let mut persisted_apps: Vec<i64> = batches
            .iter()
            .flat_map(|b| batch_app_ids(b))
            .collect();
        persisted_apps.sort();
        persisted_apps.dedup();
        assert_eq!(persisted_apps, vec![1, 3]);
    }

    #[tokio::test]
    async fn each_app_gets_exactly_one_bulk_call() {
        let fetcher = OnePageFetcher { failing_app: -1 };
        let sink = RecordingSink::default();

        let summary = dispatch(&fetcher, &sink, &[10, 20, 30, 40], &quick_options(15)).await;

        assert_eq!(summary.reviews_collected, 8);
        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 4);
        for batch in batches.iter() {
            let apps = batch_app_ids(batch);
            assert_eq!(apps.len(), 2);
            assert!(apps.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[tokio::test]
    async fn empty_harvest_skips_the_bulk_call() {
        struct EmptyFetcher;
        #[async_trait]
        impl ReviewPageFetcher for EmptyFetcher {
            async fn fetch_page(&self, _app_id: i64, _cursor: &str) -> Result<ReviewPage> {
                Ok(ReviewPage::default())
            }
        }

        let sink = RecordingSink::default();
        let summary = dispatch(&EmptyFetcher, &sink, &[1, 2], &quick_options(2)).await;

        assert_eq!(summary.apps, 2);
        assert_eq!(summary.reviews_persisted, 0);
        assert!(sink.batches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn persist_failure_is_counted_and_contained() {
        struct FlakySink {
            ok_calls: AtomicUsize,
        }
        #[async_trait]
        impl ReviewSink for FlakySink {
            async fn persist_reviews(&self, reviews: &[Value]) -> Result<u64> {
                if batch_app_ids(reviews).contains(&2) {
                    return Err(anyhow!("bulk write rejected"));
                }
                self.ok_calls.fetch_add(1, Ordering::SeqCst);
                Ok(reviews.len() as u64)
            }
        }

        let fetcher = OnePageFetcher { failing_app: -1 };
        let sink = FlakySink {
            ok_calls: AtomicUsize::new(0),
        };
        let summary = dispatch(&fetcher, &sink, &[1, 2, 3], &quick_options(3)).await;

        assert_eq!(summary.apps, 3);
        assert_eq!(summary.persist_failures, 1);
        assert_eq!(summary.reviews_persisted, 4);
        assert_eq!(sink.ok_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrent_harvests() {
        struct SlowFetcher {
            in_flight: AtomicUsize,
            max_seen: AtomicUsize,
        }
        #[async_trait]
        impl ReviewPageFetcher for SlowFetcher {
            async fn fetch_page(&self, app_id: i64, _cursor: &str) -> Result<ReviewPage> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ReviewPage {
                    success: 1,
                    cursor: None,
                    reviews: vec![fresh_review(app_id, 0)],
                })
            }
        }

        let fetcher = SlowFetcher {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        };
        let sink = RecordingSink::default();
        let summary = dispatch(&fetcher, &sink, &[1, 2, 3, 4, 5, 6], &quick_options(2)).await;

        assert_eq!(summary.apps, 6);
        assert!(fetcher.max_seen.load(Ordering::SeqCst) <= 2);
    }
}
