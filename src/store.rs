use anyhow::{Context, Result};
use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::options::{ClientOptions, UpdateOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::warn;

use crate::catalog::transform::GameRecord;
use crate::reviews::dispatcher::ReviewSink;

pub const DB_NAME: &str = "steam_games";
pub const GAME_COLLECTION: &str = "game_infos";
pub const REVIEW_COLLECTION: &str = "reviews";

/// Handle on the document store. Constructed once per process and passed by
/// reference; the underlying client is safe to share across workers.
#[derive(Clone)]
pub struct Store {
    client: Client,
    db: Database,
}

impl Store {
    // SECURITY: never log the raw URI (it may contain credentials).
    pub async fn connect(uri: &str) -> Result<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .context("MONGO_URI is not a valid connection string")?;
        let client = Client::with_options(options).context("unable to build mongodb client")?;
        let db = client.database(DB_NAME);
        Ok(Self { client, db })
    }

    /// Round-trip ping. Callers treat failure as fatal before any ingestion
    /// work begins.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .context("mongodb ping failed")?;
        Ok(())
    }

    fn games(&self) -> Collection<Document> {
        self.db.collection(GAME_COLLECTION)
    }

    /// Insert-or-overwrite one game document keyed by app id.
    pub async fn upsert_game(&self, record: &GameRecord) -> Result<()> {
        let document = bson::to_document(record).context("game record did not serialize")?;
        self.games()
            .update_one(
                doc! { "_id": record.app_id },
                doc! { "$set": document },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    /// Submit one app's reviews as a single unordered bulk of upserts keyed
    /// by `recommendationid`. Empty input issues no command at all. Returns
    /// the number of upsert statements submitted.
    pub async fn bulk_upsert_reviews(&self, reviews: &[Value]) -> Result<u64> {
        let updates = review_update_statements(reviews);
        if updates.is_empty() {
            return Ok(0);
        }
        let submitted = updates.len() as u64;
        let response = self
            .db
            .run_command(
                doc! {
                    "update": REVIEW_COLLECTION,
                    "updates": updates,
                    "ordered": false,
                },
                None,
            )
            .await?;
        if let Ok(write_errors) = response.get_array("writeErrors") {
            if !write_errors.is_empty() {
                warn!(
                    errors = write_errors.len(),
                    submitted, "bulk review upsert reported write errors"
                );
            }
        }
        Ok(submitted)
    }
}

#[async_trait]
impl ReviewSink for Store {
    async fn persist_reviews(&self, reviews: &[Value]) -> Result<u64> {
        self.bulk_upsert_reviews(reviews).await
    }
}

/// One `{q, u, upsert}` statement per review. Records without a
/// `recommendationid` cannot be deduplicated and are skipped with a warning.
fn review_update_statements(reviews: &[Value]) -> Vec<Document> {
    let mut updates = Vec::with_capacity(reviews.len());
    for review in reviews {
        let key = match review.get("recommendationid").map(|id| bson::to_bson(id)) {
            Some(Ok(key)) => key,
            _ => {
                warn!("review without recommendationid skipped");
                continue;
            }
        };
        let body = match bson::to_document(review) {
            Ok(body) => body,
            Err(error) => {
                warn!(error = %error, "review payload did not serialize to bson");
                continue;
            }
        };
        updates.push(doc! {
            "q": { "recommendationid": key },
            "u": { "$set": body },
            "upsert": true,
        });
    }
    updates
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::transform::{build_game_record, CatalogEntry};

    #[test]
    fn builds_one_upsert_statement_per_review() {
        let reviews = vec![
            json!({ "recommendationid": "111", "timestamp_created": 1, "app_id": 10 }),
            json!({ "recommendationid": "222", "timestamp_created": 2, "app_id": 10 }),
        ];
        let updates = review_update_statements(&reviews);
        assert_eq!(updates.len(), 2);

        let first = &updates[0];
        assert_eq!(
            first
                .get_document("q")
                .unwrap()
                .get_str("recommendationid")
                .unwrap(),
            "111"
        );
        assert!(first.get_bool("upsert").unwrap());
        let set = first
            .get_document("u")
            .unwrap()
            .get_document("$set")
            .unwrap();
        assert!(matches!(
            set.get("app_id"),
            Some(bson::Bson::Int32(10)) | Some(bson::Bson::Int64(10))
        ));
    }

    #[test]
    fn skips_reviews_missing_the_dedup_key() {
        let reviews = vec![
            json!({ "timestamp_created": 1 }),
            json!({ "recommendationid": "333" }),
        ];
        let updates = review_update_statements(&reviews);
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn empty_input_builds_no_statements() {
        assert!(review_update_statements(&[]).is_empty());
    }

    #[test]
    fn identical_records_build_identical_statements() {
        let review = json!({ "recommendationid": "444", "votes_up": 2, "app_id": 10 });
        let first = review_update_statements(std::slice::from_ref(&review));
        let second = review_update_statements(std::slice::from_ref(&review));
        assert_eq!(first, second);
    }

    #[test]
    fn game_record_serializes_with_id_key() {
        let record = build_game_record(10, &CatalogEntry::default());
        let document = bson::to_document(&record).unwrap();
        assert_eq!(document.get_i64("_id").unwrap(), 10);
        assert_eq!(document.get_i64("min_owners_estimated").unwrap(), 0);
        assert!(!document.contains_key("app_id"));
    }
}
