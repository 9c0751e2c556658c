//! Catalog scrape aggregation
//!
//! One pass runs the HTML, IPTV and API scrapers concurrently, merges the
//! results into a unique by-content-id map, resolves infohash-only entries
//! through the mapping table and the engine API (with one retry), persists
//! the merged set and feeds the discovered tvg-ids to the EPG merger.

pub mod api;
pub mod cache;
pub mod html;
pub mod iptv;
pub mod logo;
pub mod models;
pub mod name;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConf;
use crate::db::models::NewStream;
use crate::db::repository::{infohash as infohash_repo, streams as streams_repo};
use crate::metrics;
use crate::services::catalog::CatalogService;
use crate::services::epg::EpgHandler;

use cache::ScrapeCache;
use models::{FoundStream, SourceView};

const SCRAPE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const INFOHASH_RETRY_DELAY: Duration = Duration::from_secs(60);

lazy_static! {
    static ref ALTERNATE_MARKER: Regex = Regex::new(r"#(\d+)$").unwrap();
}

/// Everything a single scraper needs for one pass.
pub struct ScrapeContext {
    pub http: Client,
    pub cache: ScrapeCache,
    pub logos_dir: PathBuf,
    pub conf: ScraperConf,
}

pub struct AceScraper {
    http: Client,
    cache: ScrapeCache,
    logos_dir: PathBuf,
    ace_address: String,
    db: SqlitePool,
    catalog: CatalogService,
    epg: Arc<EpgHandler>,
    conf: RwLock<ScraperConf>,
    rescrape: Notify,
}

impl AceScraper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Client,
        cache_dir: PathBuf,
        logos_dir: PathBuf,
        ace_address: String,
        db: SqlitePool,
        catalog: CatalogService,
        epg: Arc<EpgHandler>,
        conf: ScraperConf,
    ) -> Self {
        Self {
            http,
            cache: ScrapeCache::new(cache_dir),
            logos_dir,
            ace_address,
            db,
            catalog,
            epg,
            conf: RwLock::new(conf),
            rescrape: Notify::new(),
        }
    }

    /// Swap in a new scraper configuration and trigger an immediate pass.
    pub async fn set_config(&self, conf: ScraperConf) {
        *self.conf.write().await = conf;
        self.rescrape.notify_one();
    }

    /// Flat list of configured sources for the management API.
    pub async fn sources_flat(&self) -> Vec<SourceView> {
        let conf = self.conf.read().await;
        let mut sources: Vec<SourceView> = conf
            .html
            .iter()
            .map(|site| SourceView {
                name: site.name.clone(),
                url: site.url.clone(),
                source_type: "html",
                title_filter: site.title_filter.clone(),
                html_filter: Some(site.html_filter.clone()),
            })
            .collect();
        sources.extend(conf.iptv_m3u8.iter().map(|site| SourceView {
            name: site.name.clone(),
            url: site.url.clone(),
            source_type: "iptv",
            title_filter: site.title_filter.clone(),
            html_filter: None,
        }));
        sources.extend(conf.api.iter().map(|site| SourceView {
            name: site.name.clone(),
            url: site.url.clone(),
            source_type: "api",
            title_filter: site.title_filter.clone(),
            html_filter: None,
        }));
        sources
    }

    /// Run one full scrape pass.
    pub async fn scrape_pass(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let conf = self.conf.read().await.clone();
        let ctx = ScrapeContext {
            http: self.http.clone(),
            cache: self.cache.clone(),
            logos_dir: self.logos_dir.clone(),
            conf: conf.clone(),
        };

        let (html_streams, iptv_streams, api_streams) = tokio::join!(
            html::scrape_html_sources(&ctx, &conf.html),
            iptv::scrape_iptv_sources(&ctx, &conf.iptv_m3u8),
            api::scrape_api_sources(&ctx, &conf.api),
        );

        let mut all_streams: Vec<FoundStream> = Vec::new();
        all_streams.extend(html_streams);
        all_streams.extend(iptv_streams);
        all_streams.extend(api_streams);

        self.fill_missing_content_ids(&mut all_streams, shutdown).await;

        let merged = create_unique_stream_list(all_streams);

        if merged.is_empty() {
            tracing::warn!("Scraper found no streams");
        } else {
            tracing::info!("Found {} unique streams", merged.len());
        }

        let tvg_ids: Vec<String> = merged
            .values()
            .map(|stream| stream.tvg_id.clone())
            .filter(|tvg_id| !tvg_id.is_empty())
            .collect();
        self.epg.add_tvg_ids(&tvg_ids).await;

        for stream in merged.values() {
            let new_stream = NewStream {
                content_id: stream.content_id.clone(),
                infohash: stream.infohash.clone(),
                title: stream.title.clone(),
                tvg_id: stream.tvg_id.clone(),
                tvg_logo: stream.tvg_logo.clone(),
                group_title: stream.group_title.clone(),
                sites_found_on: stream.sites_found_on.clone(),
                last_scraped_time: stream.last_scraped_time,
            };
            if let Err(e) = self.catalog.update_stream(&new_stream).await {
                tracing::error!(
                    "Failed to persist stream {}: {}",
                    crate::util::ids::ace_id_short(&stream.content_id),
                    e
                );
            }
        }

        self.print_duplicate_warnings(&merged);
        metrics::SCRAPE_PASSES.inc();

        Ok(())
    }

    /// Resolve content ids for infohash-only entries: mapping table first,
    /// then the catalog, then the engine API. The still-missing set is
    /// retried exactly once after a delay.
    async fn fill_missing_content_ids(
        &self,
        streams: &mut [FoundStream],
        shutdown: &CancellationToken,
    ) {
        for attempt in 0..2 {
            let mut still_missing = 0usize;

            for stream in streams.iter_mut() {
                if !stream.content_id.is_empty() {
                    continue;
                }
                let Some(infohash) = stream.infohash.clone() else {
                    continue;
                };

                if let Ok(Some(content_id)) =
                    infohash_repo::content_id_for(&self.db, &infohash).await
                {
                    stream.content_id = content_id;
                    continue;
                }
                if let Ok(Some(content_id)) =
                    streams_repo::content_id_by_infohash(&self.db, &infohash).await
                {
                    stream.content_id = content_id;
                    continue;
                }

                match self.content_id_from_engine(&infohash).await {
                    Some(content_id) => {
                        if let Err(e) =
                            infohash_repo::add_mapping(&self.db, &content_id, &infohash).await
                        {
                            tracing::error!("Failed to record infohash mapping: {}", e);
                        }
                        stream.content_id = content_id;
                    }
                    None => still_missing += 1,
                }
            }

            if still_missing == 0 {
                break;
            }

            if attempt == 0 {
                tracing::info!(
                    "Still have {} streams with missing content ids, retrying in {}s",
                    still_missing,
                    INFOHASH_RETRY_DELAY.as_secs()
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(INFOHASH_RETRY_DELAY) => {}
                }
            }
        }
    }

    /// `server/api?method=get_content_id` lookup on the engine.
    async fn content_id_from_engine(&self, infohash: &str) -> Option<String> {
        tracing::info!("Resolving content id for infohash {}", infohash);
        let url = format!(
            "{}server/api?api_version=3&method=get_content_id&infohash={}",
            self.ace_address, infohash
        );

        let payload: serde_json::Value = match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("Bad engine payload for infohash {}: {}", infohash, e);
                    return None;
                }
            },
            Err(e) => {
                tracing::error!("Failed to fetch content id for infohash {}: {}", infohash, e);
                return None;
            }
        };

        let content_id = payload
            .get("result")
            .and_then(|result| result.get("content_id"))
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string();

        if content_id.is_empty() {
            None
        } else {
            tracing::info!("Resolved infohash {} -> {}", infohash, content_id);
            Some(content_id)
        }
    }

    /// Info-level duplicate diagnostics after a pass.
    fn print_duplicate_warnings(&self, merged: &HashMap<String, FoundStream>) {
        let mut tvg_ids = HashSet::new();
        let mut infohashes = HashSet::new();
        let mut titles = HashSet::new();

        for stream in merged.values() {
            if !stream.tvg_id.is_empty()
                && !tvg_ids.insert(stream.tvg_id.clone())
                && !ALTERNATE_MARKER.is_match(&stream.title)
            {
                tracing::warn!("Duplicate TVG ID found: {}", stream.tvg_id);
            }
            if let Some(ref infohash) = stream.infohash {
                if !infohashes.insert(infohash.clone()) {
                    tracing::warn!("Duplicate infohash found: {}", infohash);
                }
            }
            if !titles.insert(stream.title.clone()) {
                tracing::warn!("Duplicate title found: {}", stream.title);
            }
        }

        tracing::info!(
            "Scraper has {} unique TVG IDs, {} unique infohashes, and {} unique titles",
            tvg_ids.len(),
            infohashes.len(),
            titles.len()
        );
    }
}

/// Merge found streams into a unique map keyed by content id. Entries
/// without a content id are dropped here; they only matter to the infohash
/// fill that runs beforehand.
pub fn create_unique_stream_list(streams: Vec<FoundStream>) -> HashMap<String, FoundStream> {
    let mut unique: HashMap<String, FoundStream> = HashMap::new();

    for stream in streams {
        if stream.content_id.is_empty() {
            continue;
        }

        match unique.get_mut(&stream.content_id) {
            None => {
                unique.insert(stream.content_id.clone(), stream);
            }
            Some(existing) => {
                for site in &stream.sites_found_on {
                    if !existing.sites_found_on.contains(site) {
                        existing.sites_found_on.push(site.clone());
                    }
                }

                if existing.tvg_logo.is_none() && stream.tvg_logo.is_some() {
                    existing.tvg_logo = stream.tvg_logo.clone();
                }
                if existing.infohash.is_none() && stream.infohash.is_some() {
                    existing.infohash = stream.infohash.clone();
                }
                if existing.tvg_id.is_empty() && !stream.tvg_id.is_empty() {
                    existing.tvg_id = stream.tvg_id.clone();
                }

                // Prefer titles carrying a country bracket
                if existing.title != stream.title {
                    if !existing.title.contains('[') && !existing.title.contains(']') {
                        existing.title = stream.title.clone();
                        existing.tvg_id = stream.tvg_id.clone();
                    } else {
                        tracing::warn!(
                            "Duplicate content_id with different titles: {} vs {}",
                            existing.title,
                            stream.title
                        );
                    }
                }
            }
        }
    }

    unique
}

/// Spawn the scrape loop: one pass immediately, then on the interval, with
/// config changes triggering an early pass.
pub fn spawn_scraper(scraper: Arc<AceScraper>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tracing::info!("Scrape aggregator started");
        loop {
            if let Err(e) = scraper.scrape_pass(&shutdown).await {
                tracing::error!("Scrape pass failed: {}", e);
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scrape aggregator stopping");
                    break;
                }
                _ = scraper.rescrape.notified() => {
                    tracing::info!("Scraper configuration changed, rescraping");
                }
                _ = tokio::time::sleep(SCRAPE_INTERVAL) => {}
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stream(content_id: &str, title: &str, site: &str) -> FoundStream {
        FoundStream {
            title: title.to_string(),
            content_id: content_id.to_string(),
            infohash: None,
            tvg_id: String::new(),
            tvg_logo: None,
            group_title: String::new(),
            sites_found_on: vec![site.to_string()],
            last_scraped_time: Utc::now(),
        }
    }

    #[test]
    fn test_dedup_prefers_bracketed_title() {
        let cid = "a".repeat(40);
        let merged = create_unique_stream_list(vec![
            stream(&cid, "X", "s1"),
            stream(&cid, "X [UK]", "s2"),
        ]);

        assert_eq!(merged.len(), 1);
        let entry = &merged[&cid];
        assert_eq!(entry.title, "X [UK]");
        assert_eq!(entry.sites_found_on, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_dedup_keeps_bracketed_title_against_plain() {
        let cid = "a".repeat(40);
        let merged = create_unique_stream_list(vec![
            stream(&cid, "X [UK]", "s1"),
            stream(&cid, "X", "s2"),
        ]);
        assert_eq!(merged[&cid].title, "X [UK]");
    }

    #[test]
    fn test_dedup_drops_content_id_less_entries() {
        let mut no_id = stream("", "Orphan", "s1");
        no_id.infohash = Some("b".repeat(40));
        let merged = create_unique_stream_list(vec![no_id]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_dedup_unique_ids() {
        let merged = create_unique_stream_list(vec![
            stream(&"a".repeat(40), "A", "s1"),
            stream(&"b".repeat(40), "B", "s1"),
            stream(&"a".repeat(40), "A", "s2"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_dedup_fills_first_infohash_and_logo() {
        let cid = "a".repeat(40);
        let mut first = stream(&cid, "A", "s1");
        first.infohash = Some("c".repeat(40));
        let mut second = stream(&cid, "A", "s2");
        second.infohash = Some("d".repeat(40));
        second.tvg_logo = Some("a.png".to_string());

        let merged = create_unique_stream_list(vec![first, second]);
        let entry = &merged[&cid];
        assert_eq!(entry.infohash, Some("c".repeat(40)));
        assert_eq!(entry.tvg_logo, Some("a.png".to_string()));
    }
}
