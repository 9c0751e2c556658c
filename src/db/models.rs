//! Database row types for SQLite

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Catalog entry row. `xc_id` is the stable small integer the XC protocol
/// exposes; it is allocated by insert order and survives restarts.
#[derive(Debug, Clone, FromRow)]
pub struct StreamRow {
    pub xc_id: i64,
    pub content_id: String,
    pub infohash: Option<String>,
    pub title: String,
    pub tvg_id: String,
    pub tvg_logo: Option<String>,
    pub group_title: String,
    pub sites_found_on: String,
    pub last_scraped_time: DateTime<Utc>,
}

impl StreamRow {
    /// Decode the JSON-encoded list of source names this entry was found on.
    pub fn sites(&self) -> Vec<String> {
        serde_json::from_str(&self.sites_found_on).unwrap_or_default()
    }
}

/// Upsert payload for a catalog entry.
#[derive(Debug, Clone)]
pub struct NewStream {
    pub content_id: String,
    pub infohash: Option<String>,
    pub title: String,
    pub tvg_id: String,
    pub tvg_logo: Option<String>,
    pub group_title: String,
    pub sites_found_on: Vec<String>,
    pub last_scraped_time: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QualityRow {
    pub content_id: String,
    pub score: i64,
    pub has_ever_worked: bool,
    pub m3u_failures: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub xc_category_id: i64,
    pub category: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub stream_token: String,
}
