//! Review phase: cursor-paginated harvesting per app, fanned out across a
//! bounded worker pool, with one bulk upsert per app.
pub mod client;
pub mod dispatcher;
pub mod harvester;

pub use client::{ReviewPageFetcher, SteamReviewClient};
pub use dispatcher::{dispatch, DispatchOptions, ReviewIngestSummary, ReviewSink};
pub use harvester::{harvest, HarvestOptions, HarvestOutcome, HarvestStop};
