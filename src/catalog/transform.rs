use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw SteamSpy catalog entry. Upstream field types are inconsistent across
/// apps (several numeric-looking fields arrive as strings), so anything we
/// only pass through stays a raw JSON value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub score_rank: Option<Value>,
    #[serde(default)]
    pub positive: Option<i64>,
    #[serde(default)]
    pub negative: Option<i64>,
    #[serde(default)]
    pub userscore: Option<Value>,
    #[serde(default)]
    pub owners: Option<String>,
    #[serde(default)]
    pub average_forever: Option<i64>,
    #[serde(default)]
    pub average_2weeks: Option<i64>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub initialprice: Option<Value>,
    #[serde(default)]
    pub discount: Option<Value>,
    #[serde(default)]
    pub ccu: Option<i64>,
}

/// Cleaned game document persisted to `game_infos`, keyed by app id.
#[derive(Debug, Clone, Serialize)]
pub struct GameRecord {
    #[serde(rename = "_id")]
    pub app_id: i64,
    pub name: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub score_rank: Option<Value>,
    pub positive_reviews: Option<i64>,
    pub negative_reviews: Option<i64>,
    pub user_score: Option<Value>,
    pub min_owners_estimated: i64,
    pub max_owners_estimated: i64,
    pub avg_playtime_forever: Option<i64>,
    pub avg_playtime_2weeks: Option<i64>,
    pub price_cents: Option<Value>,
    pub initial_price_cents: Option<Value>,
    pub discount_percent: Option<Value>,
    pub concurrent_users: Option<i64>,
}

fn digit_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static pattern"))
}

/// Parse a SteamSpy owner-range string like `"20,000 .. 50,000"`.
/// No numeric token yields (0, 0); a single token fills both ends; with two
/// or more, the first two are taken in order. If upstream ever reports
/// min > max that inconsistency is kept as-is.
pub fn parse_owner_range(raw: &str) -> (i64, i64) {
    let stripped = raw.replace(',', "");
    let mut numbers = digit_runs()
        .find_iter(&stripped)
        .filter_map(|m| m.as_str().parse::<i64>().ok());
    match (numbers.next(), numbers.next()) {
        (Some(min), Some(max)) => (min, max),
        (Some(only), None) => (only, only),
        _ => (0, 0),
    }
}

/// Map one raw catalog entry into the stored game document.
pub fn build_game_record(app_id: i64, entry: &CatalogEntry) -> GameRecord {
    let (min_owners, max_owners) = entry
        .owners
        .as_deref()
        .map(parse_owner_range)
        .unwrap_or((0, 0));
    GameRecord {
        app_id,
        name: entry.name.clone(),
        developer: entry.developer.clone(),
        publisher: entry.publisher.clone(),
        score_rank: entry.score_rank.clone(),
        positive_reviews: entry.positive,
        negative_reviews: entry.negative,
        user_score: entry.userscore.clone(),
        min_owners_estimated: min_owners,
        max_owners_estimated: max_owners,
        avg_playtime_forever: entry.average_forever,
        avg_playtime_2weeks: entry.average_2weeks,
        price_cents: entry.price.clone(),
        initial_price_cents: entry.initialprice.clone(),
        discount_percent: entry.discount.clone(),
        concurrent_users: entry.ccu,
    }
}
