//! HTML page scraper
//!
//! Walks every anchor referencing the engine, then climbs the anchor's
//! ancestor chain (and optionally previous siblings) collecting text nodes
//! that match the source's target class as title candidates. Text that shows
//! up for every anchor is site chrome and gets rejected.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use crate::config::HtmlSource;
use crate::util::ids::{extract_content_id_from_url, is_ace_url, is_valid_ace_id};

use super::cache::HTML_CACHE_MAX_AGE;
use super::models::FoundStream;
use super::name;
use super::{logo, ScrapeContext};

/// One engine link found on a page, with the titles seen around it.
#[derive(Debug)]
struct CandidateStream {
    url: String,
    title_candidates: Vec<String>,
}

/// Scrape every configured HTML source. Failures in one source only cost
/// that source's streams.
pub async fn scrape_html_sources(ctx: &ScrapeContext, sites: &[HtmlSource]) -> Vec<FoundStream> {
    let mut found = Vec::new();
    for site in sites {
        match scrape_site(ctx, site).await {
            Ok(streams) => {
                tracing::debug!("Found {} streams on site {}", streams.len(), site.name);
                found.extend(streams);
            }
            Err(e) => {
                tracing::error!("HTML scrape failed for {}: {}", site.name, e);
            }
        }
    }
    found
}

async fn scrape_site(ctx: &ScrapeContext, site: &HtmlSource) -> anyhow::Result<Vec<FoundStream>> {
    let body = get_site_content(ctx, site).await?;
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = collect_candidates(&body, site);
    Ok(process_candidates(ctx, candidates, site))
}

async fn get_site_content(ctx: &ScrapeContext, site: &HtmlSource) -> anyhow::Result<String> {
    if ctx.cache.is_fresh(&site.url, HTML_CACHE_MAX_AGE).await {
        tracing::debug!("Loaded HTML site content from cache for: {}", site.name);
        return Ok(ctx.cache.load(&site.url).await);
    }

    tracing::debug!("Scraping streams from HTML site: {}", site.name);
    let body = ctx
        .http
        .get(&site.url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    ctx.cache.save(&site.url, &body).await;
    Ok(body)
}

/// Parse the page and gather title candidates around every engine anchor.
fn collect_candidates(body: &str, site: &HtmlSource) -> Vec<CandidateStream> {
    let document = Html::parse_document(body);
    let anchor_selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let mut candidates: Vec<CandidateStream> = Vec::new();

    for anchor in document.select(&anchor_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !is_ace_url(href) {
            tracing::trace!("Skipping non-engine link: {}", href);
            continue;
        }

        // The same link may appear several times on a page
        if candidates.iter().any(|c| c.url == href) {
            continue;
        }

        let mut titles = search_ancestors(anchor, &site.html_filter.target_class);
        if site.html_filter.check_sibling {
            titles.extend(search_ancestor_siblings(anchor, &site.html_filter.target_class));
        }

        let mut titles =
            name::candidates_regex_cleanup(titles, &site.title_filter.regex_postprocessing);
        titles.sort();
        titles.dedup();

        candidates.push(CandidateStream {
            url: href.to_string(),
            title_candidates: titles,
        });
    }

    candidates
}

/// Climb from the anchor through its ancestors, collecting matching text.
fn search_ancestors(anchor: ElementRef, target_class: &str) -> Vec<String> {
    let mut titles = Vec::new();

    if let Some(title) = check_candidate(anchor, target_class) {
        titles.push(title);
    }

    for ancestor in anchor.ancestors() {
        if let Some(element) = ElementRef::wrap(ancestor) {
            if let Some(title) = check_candidate(element, target_class) {
                titles.push(title);
            }
        }
    }

    titles
}

/// Check the previous sibling of the anchor and of each of its ancestors.
fn search_ancestor_siblings(anchor: ElementRef, target_class: &str) -> Vec<String> {
    let mut titles = Vec::new();

    let mut nodes = vec![*anchor];
    nodes.extend(anchor.ancestors());

    for node in nodes {
        let mut sibling = node.prev_sibling();
        while let Some(node) = sibling {
            if let Some(element) = ElementRef::wrap(node) {
                if let Some(title) = check_candidate(element, target_class) {
                    titles.push(title);
                }
                break;
            }
            sibling = node.prev_sibling();
        }
    }

    titles
}

/// An element yields a candidate title when its class list matches the
/// target class, or when both are absent.
fn check_candidate(element: ElementRef, target_class: &str) -> Option<String> {
    let matches = if target_class.is_empty() {
        element.value().classes().next().is_none()
    } else {
        element.value().classes().any(|class| class == target_class)
    };

    if !matches {
        return None;
    }

    let text: String = element.text().collect::<Vec<_>>().join(" ");
    let cleaned = name::cleanup_candidate_title(&text);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Turn candidates into found streams: reject site-wide chrome titles,
/// apply the title filter and extract content ids.
fn process_candidates(
    ctx: &ScrapeContext,
    candidates: Vec<CandidateStream>,
    site: &HtmlSource,
) -> Vec<FoundStream> {
    let mut title_counts: HashMap<&str, usize> = HashMap::new();
    for candidate in &candidates {
        for title in &candidate.title_candidates {
            *title_counts.entry(title.as_str()).or_default() += 1;
        }
    }

    let total_candidates = candidates.len();
    let mut found = Vec::new();

    for candidate in &candidates {
        let usable: Vec<String> = candidate
            .title_candidates
            .iter()
            .filter(|title| title_counts.get(title.as_str()).copied().unwrap_or(0) < total_candidates)
            .map(|title| name::trim_title(title))
            .collect();

        let title = match usable.len() {
            0 => candidate.url.clone(),
            1 => usable[0].clone(),
            _ => usable.join(" / "),
        };

        let title = match name::title_override(
            &ctx.conf.content_id_name_overrides,
            extract_content_id_from_url(&candidate.url)
                .unwrap_or_default()
                .as_str(),
            None,
        ) {
            Some(override_title) => override_title.clone(),
            None => title,
        };

        if !name::check_title_allowed(&title, &site.title_filter) {
            continue;
        }

        let Some(content_id) = extract_content_id_from_url(&candidate.url) else {
            tracing::warn!("No valid content id in candidate URL: {}", candidate.url);
            continue;
        };
        if !is_valid_ace_id(&content_id) {
            continue;
        }

        let tvg_id = name::tvg_id_from_title(&title);
        let tvg_logo = logo::find_logo_file(&ctx.logos_dir, &title);
        let group_title = name::populate_group_title("", &title, &ctx.conf.category_mapping);

        let stream = FoundStream {
            title,
            content_id,
            infohash: None,
            tvg_id,
            tvg_logo,
            group_title,
            sites_found_on: vec![site.name.clone()],
            last_scraped_time: chrono::Utc::now(),
        };

        match stream.validate() {
            Ok(()) => found.push(stream),
            Err(e) => tracing::warn!("Dropping invalid HTML stream: {}", e),
        }
    }

    found
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

    fn site(target_class: &str) -> HtmlSource {
        HtmlSource {
            name: "html-site".to_string(),
            url: "https://example.com/streams".to_string(),
            html_filter: crate::config::HtmlFilter {
                target_class: target_class.to_string(),
                check_sibling: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_extracts_stream_with_classed_title() {
        let tmp = tempfile::tempdir().unwrap();
        let cid_a = "a".repeat(40);
        let cid_b = "b".repeat(40);
        let body = format!(
            r#"<html><body>
            <div class="stream-name">Sports Channel [AU]<a href="acestream://{cid_a}"></a></div>
            <div class="stream-name">News Channel [UK]<a href="acestream://{cid_b}"></a></div>
            </body></html>"#
        );

        let candidates = collect_candidates(&body, &site("stream-name"));
        assert_eq!(candidates.len(), 2);

        let streams = process_candidates(&ctx(&tmp), candidates, &site("stream-name"));
        assert_eq!(streams.len(), 2);

        let titles: Vec<&str> = streams.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"Sports Channel [AU]"));
        assert!(titles.contains(&"News Channel [UK]"));
        assert_eq!(
            streams.iter().find(|s| s.title.contains("Sports")).unwrap().content_id,
            cid_a
        );
    }

    #[test]
    fn test_site_wide_chrome_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cid_a = "a".repeat(40);
        let cid_b = "b".repeat(40);
        // "Channel List" appears around every anchor and must not become a title
        let body = format!(
            r#"<html><body><div class="t">Channel List
            <p class="t">Alpha<a href="acestream://{cid_a}">x</a></p>
            <p class="t">Beta<a href="acestream://{cid_b}">x</a></p>
            </div></body></html>"#
        );

        let candidates = collect_candidates(&body, &site("t"));
        let streams = process_candidates(&ctx(&tmp), candidates, &site("t"));
        assert_eq!(streams.len(), 2);
        for stream in &streams {
            assert!(!stream.title.contains("Channel List"), "{}", stream.title);
        }
    }

    #[test]
    fn test_duplicate_hrefs_collapse() {
        let cid = "c".repeat(40);
        let body = format!(
            r#"<html><body>
            <a href="acestream://{cid}">one</a>
            <a href="acestream://{cid}">two</a>
            </body></html>"#
        );
        let candidates = collect_candidates(&body, &site(""));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_no_engine_links_no_candidates() {
        let body = r#"<html><body><a href="https://example.com">nope</a></body></html>"#;
        assert!(collect_candidates(body, &site("")).is_empty());
    }
}
