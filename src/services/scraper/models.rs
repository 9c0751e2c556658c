//! Scrape result models

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::util::ids::is_valid_ace_id;

/// One stream discovered by any scraper, before dedup/merge.
#[derive(Debug, Clone)]
pub struct FoundStream {
    pub title: String,
    /// Empty until resolved for infohash-only sources.
    pub content_id: String,
    pub infohash: Option<String>,
    pub tvg_id: String,
    pub tvg_logo: Option<String>,
    pub group_title: String,
    pub sites_found_on: Vec<String>,
    pub last_scraped_time: DateTime<Utc>,
}

impl FoundStream {
    /// A found stream must carry at least one valid id and a title.
    pub fn validate(&self) -> Result<(), String> {
        if self.content_id.is_empty() && self.infohash.is_none() {
            return Err("Either content_id or infohash must be provided".to_string());
        }
        if !self.content_id.is_empty() && !is_valid_ace_id(&self.content_id) {
            return Err(format!("Invalid content_id: {}", self.content_id));
        }
        if let Some(ref infohash) = self.infohash {
            if !is_valid_ace_id(infohash) {
                return Err(format!("Invalid infohash: {infohash}"));
            }
        }
        if self.title.is_empty() {
            return Err("Title cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Item shape returned by JSON API sources.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSourceItem {
    pub infohash: String,
    pub name: String,
    #[serde(default)]
    pub availability: f64,
    #[serde(default)]
    pub availability_updated_at: i64,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

/// Flat view of a configured source for the management API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceView {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: &'static str,
    pub title_filter: crate::config::TitleFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_filter: Option<crate::config::HtmlFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_an_id() {
        let stream = FoundStream {
            title: "X".to_string(),
            content_id: String::new(),
            infohash: None,
            tvg_id: String::new(),
            tvg_logo: None,
            group_title: String::new(),
            sites_found_on: vec![],
            last_scraped_time: Utc::now(),
        };
        assert!(stream.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ids() {
        let stream = FoundStream {
            title: "X".to_string(),
            content_id: "nope".to_string(),
            infohash: None,
            tvg_id: String::new(),
            tvg_logo: None,
            group_title: String::new(),
            sites_found_on: vec![],
            last_scraped_time: Utc::now(),
        };
        assert!(stream.validate().is_err());
    }
}
