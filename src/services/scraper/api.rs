//! JSON API source scraper
//!
//! API sources return a list of `{infohash, name, availability, ...}`
//! objects. Entries come in with an infohash only; the aggregator resolves
//! content ids afterwards.

use chrono::{TimeZone, Utc};

use crate::config::ApiSource;

use super::models::{ApiSourceItem, FoundStream};
use super::name;
use super::{logo, ScrapeContext};

/// Scrape every configured API source. Failures in one source only cost
/// that source's streams.
pub async fn scrape_api_sources(ctx: &ScrapeContext, sites: &[ApiSource]) -> Vec<FoundStream> {
    let mut found = Vec::new();
    for site in sites {
        match scrape_site(ctx, site).await {
            Ok(streams) => {
                tracing::debug!("Found {} streams on API site {}", streams.len(), site.name);
                found.extend(streams);
            }
            Err(e) => {
                tracing::error!("API scrape failed for {}: {}", site.name, e);
            }
        }
    }
    found
}

async fn scrape_site(ctx: &ScrapeContext, site: &ApiSource) -> anyhow::Result<Vec<FoundStream>> {
    tracing::debug!("Scraping streams from API site: {}", site.name);

    let items: Vec<serde_json::Value> = ctx
        .http
        .get(&site.url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    tracing::debug!("Scraped {} items from API site: {}", items.len(), site.name);

    let mut streams = Vec::new();
    for raw in items {
        let item: ApiSourceItem = match serde_json::from_value(raw.clone()) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Failed to decode API response item: {} ({})", e, raw);
                continue;
            }
        };

        if let Some(stream) = found_stream_from_item(ctx, item, site).await {
            streams.push(stream);
        }
    }

    Ok(streams)
}

async fn found_stream_from_item(
    ctx: &ScrapeContext,
    item: ApiSourceItem,
    site: &ApiSource,
) -> Option<FoundStream> {
    let override_title =
        name::title_override(&ctx.conf.content_id_name_overrides, "", Some(&item.infohash));
    let title = match override_title {
        Some(title) => title.clone(),
        None => name::cleanup_candidate_title(&item.name),
    };

    if !name::check_title_allowed(&title, &site.title_filter) {
        return None;
    }

    let tvg_id = name::tvg_id_from_title(&title);
    let raw_group = item
        .categories
        .as_ref()
        .and_then(|c| c.first())
        .cloned()
        .unwrap_or_default();
    let group_title = name::populate_group_title(&raw_group, &title, &ctx.conf.category_mapping);
    let tvg_logo = logo::find_logo_file(&ctx.logos_dir, &title);

    // Full availability counts as freshly seen
    let last_scraped_time = if item.availability >= 1.0 {
        Utc::now()
    } else {
        Utc.timestamp_opt(item.availability_updated_at, 0)
            .single()
            .unwrap_or_else(Utc::now)
    };

    let stream = FoundStream {
        title,
        content_id: String::new(),
        infohash: Some(item.infohash),
        tvg_id,
        tvg_logo,
        group_title,
        sites_found_on: vec![site.name.clone()],
        last_scraped_time,
    };

    match stream.validate() {
        Ok(()) => Some(stream),
        Err(e) => {
            tracing::warn!("Dropping invalid API stream: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConf;
    use crate::services::scraper::cache::ScrapeCache;

    fn ctx(tmp: &tempfile::TempDir) -> ScrapeContext {
        ScrapeContext {
            http: reqwest::Client::new(),
            cache: ScrapeCache::new(tmp.path().join("cache")),
            logos_dir: tmp.path().join("logos"),
            conf: ScraperConf::default(),
        }
    }

    fn site() -> ApiSource {
        ApiSource {
            name: "api-site".to_string(),
            url: "https://api.example.com/streams".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_item_becomes_infohash_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let item = ApiSourceItem {
            infohash: "e".repeat(40),
            name: "Racing Channel [AU]".to_string(),
            availability: 0.5,
            availability_updated_at: 1700000000,
            categories: Some(vec!["motorsport".to_string()]),
        };

        let stream = found_stream_from_item(&ctx(&tmp), item, &site()).await.unwrap();
        assert_eq!(stream.content_id, "");
        assert_eq!(stream.infohash, Some("e".repeat(40)));
        assert_eq!(stream.tvg_id, "Racing Channel.au");
        assert_eq!(stream.last_scraped_time.timestamp(), 1700000000);
        // "motorsport" hits the "moto" keyword
        assert_eq!(stream.group_title, "Sports");
    }

    #[tokio::test]
    async fn test_full_availability_is_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let item = ApiSourceItem {
            infohash: "f".repeat(40),
            name: "Channel".to_string(),
            availability: 1.0,
            availability_updated_at: 1000,
            categories: None,
        };
        let stream = found_stream_from_item(&ctx(&tmp), item, &site()).await.unwrap();
        assert!(stream.last_scraped_time.timestamp() > 1000);
    }

    #[tokio::test]
    async fn test_invalid_infohash_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let item = ApiSourceItem {
            infohash: "short".to_string(),
            name: "Channel".to_string(),
            availability: 1.0,
            availability_updated_at: 0,
            categories: None,
        };
        assert!(found_stream_from_item(&ctx(&tmp), item, &site()).await.is_none());
    }
}
