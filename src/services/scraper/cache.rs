//! On-disk TTL cache of raw source documents
//!
//! The filesystem is the cache: one file per source URL (slugified), with
//! freshness judged from the file's mtime. Writes go through a temp file and
//! an atomic rename.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::util::ids::slugify;

pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);
/// HTML sources churn faster and are re-scraped more often.
pub const HTML_CACHE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct ScrapeCache {
    cache_dir: PathBuf,
}

impl ScrapeCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn cache_file_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.txt", slugify(url)))
    }

    /// Whether a cached copy exists and is younger than `max_age`.
    pub async fn is_fresh(&self, url: &str, max_age: Duration) -> bool {
        let path = self.cache_file_path(url);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                tracing::debug!("Cache file does not exist: {}", url);
                return false;
            }
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        let fresh = age < max_age;
        tracing::debug!(
            "Cache file for {} is {} [age {:?}, max {:?}]",
            url,
            if fresh { "fresh" } else { "outdated" },
            age,
            max_age
        );
        fresh
    }

    /// Cached body for a URL, empty when absent or unreadable.
    pub async fn load(&self, url: &str) -> String {
        tokio::fs::read_to_string(self.cache_file_path(url))
            .await
            .unwrap_or_default()
    }

    /// Write a body to the cache atomically.
    pub async fn save(&self, url: &str, content: &str) {
        let final_path = self.cache_file_path(url);
        let tmp_path = final_path.with_extension("txt.tmp");

        if let Err(e) = tokio::fs::write(&tmp_path, content).await {
            tracing::error!("Failed to write scrape cache for {}: {}", url, e);
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            tracing::error!("Failed to finalise scrape cache for {}: {}", url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ScrapeCache::new(tmp.path().to_path_buf());

        let url = "https://example.com/list.m3u8";
        cache.save(url, "#EXTM3U\n").await;
        assert_eq!(cache.load(url).await, "#EXTM3U\n");
        assert!(cache.is_fresh(url, DEFAULT_CACHE_MAX_AGE).await);
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ScrapeCache::new(tmp.path().to_path_buf());
        assert_eq!(cache.load("https://nope.example/x").await, "");
        assert!(!cache.is_fresh("https://nope.example/x", DEFAULT_CACHE_MAX_AGE).await);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ScrapeCache::new(tmp.path().to_path_buf());
        let url = "https://example.com/a";
        cache.save(url, "body").await;
        assert!(!cache.is_fresh(url, Duration::ZERO).await);
    }
}
