//! IPTV M3U playlist scraper
//!
//! Splits a playlist body into `#EXTINF` sections, each with exactly one
//! stream URL, and turns the sections referencing the engine into found
//! streams.

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::IptvSource;
use crate::util::ids::{extract_content_id_from_url, extract_infohash_from_url, is_ace_url};

use super::cache::DEFAULT_CACHE_MAX_AGE;
use super::models::FoundStream;
use super::name;
use super::{logo, ScrapeContext};

lazy_static! {
    static ref TVG_ID_ATTR: Regex = Regex::new(r#"tvg-id="([^"]+)""#).unwrap();
    static ref TVG_LOGO_ATTR: Regex = Regex::new(r#"tvg-logo="([^"]+)""#).unwrap();
    static ref GROUP_TITLE_ATTR: Regex = Regex::new(r#"group-title="([^"]+)""#).unwrap();
    static ref LAST_FOUND_ATTR: Regex = Regex::new(r#"x-last-found="(\d+)""#).unwrap();
}

/// Scrape every configured IPTV source. Failures in one source only cost
/// that source's streams.
pub async fn scrape_iptv_sources(ctx: &ScrapeContext, sites: &[IptvSource]) -> Vec<FoundStream> {
    let mut found = Vec::new();
    for site in sites {
        match scrape_site(ctx, site).await {
            Ok(streams) => {
                tracing::debug!("Found {} streams on IPTV site {}", streams.len(), site.name);
                found.extend(streams);
            }
            Err(e) => {
                tracing::error!("IPTV scrape failed for {}: {}", site.name, e);
            }
        }
    }
    found
}

async fn scrape_site(ctx: &ScrapeContext, site: &IptvSource) -> anyhow::Result<Vec<FoundStream>> {
    let content = get_site_content(ctx, site).await?;
    if content.is_empty() {
        return Ok(Vec::new());
    }

    Ok(parse_m3u_content(ctx, &content, site).await)
}

async fn get_site_content(ctx: &ScrapeContext, site: &IptvSource) -> anyhow::Result<String> {
    if ctx.cache.is_fresh(&site.url, DEFAULT_CACHE_MAX_AGE).await {
        tracing::debug!("Loaded IPTV site content from cache for: {}", site.name);
        return Ok(ctx.cache.load(&site.url).await);
    }

    tracing::info!("Scraping streams from IPTV site: {}", site.name);
    let content = ctx
        .http
        .get(&site.url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    ctx.cache.save(&site.url, &content).await;
    Ok(content)
}

/// Parse M3U content into found streams.
pub async fn parse_m3u_content(
    ctx: &ScrapeContext,
    content: &str,
    site: &IptvSource,
) -> Vec<FoundStream> {
    let mut found = Vec::new();

    for section in split_into_sections(content) {
        let extinf_line = &section[0];

        // The stream URL is the one non-comment line of the section
        let Some(stream_url) = section[1..].iter().find(|line| is_ace_url(line.as_str()))
        else {
            continue;
        };

        let content_id = extract_content_id_from_url(stream_url).unwrap_or_default();
        let infohash = extract_infohash_from_url(stream_url);

        if content_id.is_empty() && infohash.is_none() {
            continue;
        }

        if let Some(stream) =
            found_stream_from_extinf(ctx, extinf_line, content_id, infohash, site).await
        {
            found.push(stream);
        }
    }

    found
}

/// Group playlist lines into sections, each starting with `#EXTINF`.
fn split_into_sections(content: &str) -> Vec<Vec<String>> {
    let mut sections: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line == "#EXTM3U" {
            continue;
        }

        if line.starts_with("#EXTINF:") {
            if !current.is_empty() {
                sections.push(current);
            }
            current = vec![line.to_string()];
        } else if !current.is_empty() {
            current.push(line.to_string());
        }
    }

    if !current.is_empty() {
        sections.push(current);
    }

    sections
}

async fn found_stream_from_extinf(
    ctx: &ScrapeContext,
    line: &str,
    content_id: String,
    infohash: Option<String>,
    site: &IptvSource,
) -> Option<FoundStream> {
    let Some((_, raw_title)) = line.split_once(',') else {
        tracing::warn!("Malformed EXTINF line: {}", line);
        return None;
    };
    let mut title = raw_title.trim().to_string();

    // A source-supplied tvg-id wins, but still enriches the title with its
    // country code when the title lacks one
    let supplied_tvg_id = TVG_ID_ATTR
        .captures(line)
        .map(|caps| caps[1].trim().to_string());
    if let Some(ref tvg_id) = supplied_tvg_id {
        title = name::enrich_title_with_country(tvg_id, &title);
    }

    let override_title = name::title_override(
        &ctx.conf.content_id_name_overrides,
        &content_id,
        infohash.as_deref(),
    );
    title = match override_title {
        Some(name) => name.clone(),
        None => name::cleanup_candidate_title(&title),
    };

    let tvg_id = supplied_tvg_id.unwrap_or_else(|| name::tvg_id_from_title(&title));

    if !name::check_title_allowed(&title, &site.title_filter) {
        return None;
    }

    let group_title = GROUP_TITLE_ATTR
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();
    let group_title = name::populate_group_title(&group_title, &title, &ctx.conf.category_mapping);

    let source_logo_url = TVG_LOGO_ATTR.captures(line).map(|caps| caps[1].to_string());
    logo::download_logo(
        &ctx.http,
        &ctx.logos_dir,
        &title,
        ctx.conf.tvg_logo_external_url.as_deref(),
        source_logo_url.as_deref(),
    )
    .await;
    let tvg_logo = logo::find_logo_file(&ctx.logos_dir, &title);

    let last_scraped_time = last_found_time(line);

    let stream = FoundStream {
        title,
        content_id,
        infohash,
        tvg_id,
        tvg_logo,
        group_title,
        sites_found_on: vec![site.name.clone()],
        last_scraped_time,
    };

    match stream.validate() {
        Ok(()) => Some(stream),
        Err(e) => {
            tracing::warn!("Dropping invalid IPTV stream: {}", e);
            None
        }
    }
}

fn last_found_time(line: &str) -> DateTime<Utc> {
    LAST_FOUND_ATTR
        .captures(line)
        .and_then(|caps| caps[1].parse::<i64>().ok())
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scraper::cache::ScrapeCache;
    use crate::config::ScraperConf;

    fn ctx(tmp: &tempfile::TempDir) -> ScrapeContext {
        ScrapeContext {
            http: reqwest::Client::new(),
            cache: ScrapeCache::new(tmp.path().join("cache")),
            logos_dir: tmp.path().join("logos"),
            conf: ScraperConf::default(),
        }
    }

    fn site() -> IptvSource {
        IptvSource {
            name: "test-site".to_string(),
            url: "https://example.com/list.m3u8".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parse_basic_playlist() {
        let tmp = tempfile::tempdir().unwrap();
        let cid = "a".repeat(40);
        let content = format!(
            "#EXTM3U\n\
             #EXTINF:-1 tvg-id=\"BBC One.uk\" group-title=\"TV\", BBC One\n\
             acestream://{cid}\n"
        );

        let streams = parse_m3u_content(&ctx(&tmp), &content, &site()).await;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].content_id, cid);
        assert_eq!(streams[0].title, "BBC One [UK]");
        assert_eq!(streams[0].tvg_id, "BBC One.uk");
        assert_eq!(streams[0].sites_found_on, vec!["test-site".to_string()]);
    }

    #[tokio::test]
    async fn test_parse_infohash_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let hash = "b".repeat(40);
        let content = format!(
            "#EXTINF:-1, Some Channel [AU]\n\
             http://127.0.0.1:6878/ace/getstream?infohash={hash}\n"
        );

        let streams = parse_m3u_content(&ctx(&tmp), &content, &site()).await;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].content_id, "");
        assert_eq!(streams[0].infohash, Some(hash));
        // Derived from the title's country bracket
        assert_eq!(streams[0].tvg_id, "Some Channel.au");
    }

    #[tokio::test]
    async fn test_non_ace_urls_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let content = "#EXTINF:-1, Regular HTTP Channel\nhttps://cdn.example.com/stream.m3u8\n";
        let streams = parse_m3u_content(&ctx(&tmp), content, &site()).await;
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn test_title_filter_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let cid = "c".repeat(40);
        let mut filtered_site = site();
        filtered_site
            .title_filter
            .always_exclude_words
            .push("Adult".to_string());

        let content = format!("#EXTINF:-1, Adult Channel\nacestream://{cid}\n");
        let streams = parse_m3u_content(&ctx(&tmp), &content, &filtered_site).await;
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn test_x_last_found_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let cid = "d".repeat(40);
        let content = format!(
            "#EXTINF:-1 x-last-found=\"1700000000\", Old Channel\nacestream://{cid}\n"
        );
        let streams = parse_m3u_content(&ctx(&tmp), &content, &site()).await;
        assert_eq!(streams[0].last_scraped_time.timestamp(), 1700000000);
    }

    #[test]
    fn test_split_into_sections() {
        let content = "#EXTM3U\n#EXTINF:-1,A\nurl-a\n\n#EXTINF:-1,B\nurl-b\n";
        let sections = split_into_sections(content);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], vec!["#EXTINF:-1,A", "url-a"]);
        assert_eq!(sections[1], vec!["#EXTINF:-1,B", "url-b"]);
    }
}
