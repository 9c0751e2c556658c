//! HLS reverse proxy core
//!
//! Shared by the HTTP routes and the background quality recheck: resolve a
//! content id through the session pool, fetch the engine playlist, rewrite
//! it to the gateway origin and feed the result to the quality tracker.
//! Segment requests are forwarded as-is with header filtering.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};

use crate::error::AppError;
use crate::metrics;
use crate::util::hls::{rewrite_playlist_sources, EXCLUDED_PROXY_HEADERS};
use crate::util::ids::{ace_id_short, is_valid_ace_id};
use crate::AppState;

/// Total timeout for proxied engine fetches. High, but players retry badly.
const REVERSE_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Proxy the HLS playlist for a content id.
///
/// Every fetch failure with a known content id feeds the quality tracker
/// exactly one empty observation before the error is returned.
pub async fn proxy_playlist(
    state: &AppState,
    content_id: &str,
    token: &str,
) -> Result<Response, AppError> {
    if !is_valid_ace_id(content_id) {
        return Err(AppError::BadInput(format!(
            "Invalid content ID or infohash: {content_id}"
        )));
    }

    metrics::HLS_PLAYLIST_REQUESTS.inc();

    let hls_url = match state.pool.get_hls_url(content_id).await {
        Some(url) => url,
        None => {
            let msg = format!(
                "Can't serve HLS stream, pool is full or stream failed to start: {}",
                ace_id_short(content_id)
            );
            tracing::error!("{}", msg);
            return Err(AppError::PoolFull(msg));
        }
    };

    let response = match state
        .http
        .get(&hls_url)
        .timeout(REVERSE_PROXY_TIMEOUT)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
    {
        Ok(resp) => resp,
        Err(e) => {
            state.quality.observe(content_id, "").await;
            return Err(map_fetch_error(&e, &format!("/hls/{}", ace_id_short(content_id))));
        }
    };

    let status = response.status().as_u16();
    let upstream_headers = copy_headers(response.headers());
    let body_bytes = response.bytes().await.map_err(|e| {
        tracing::error!("Failed to read engine playlist body: {}", e);
        AppError::Internal("Failed to read HLS stream body".to_string())
    })?;
    let content = String::from_utf8_lossy(&body_bytes).to_string();

    if !content.contains("#EXTM3U") {
        tracing::error!(
            "Invalid HLS stream received for {}",
            ace_id_short(content_id)
        );
        tracing::debug!("Content received: {:.1000}", content);
        state.quality.observe(content_id, "").await;
        return Err(AppError::BadInput(format!(
            "Invalid HLS stream for {}",
            ace_id_short(content_id)
        )));
    }

    let ace_address = state.config.read().await.app.ace_address.clone();
    let rewritten =
        rewrite_playlist_sources(&content, &ace_address, &state.external_url, token);

    state.quality.observe(content_id, &rewritten).await;

    build_response(status, upstream_headers, Body::from(rewritten), None)
}

/// Proxy the multistream playlist path (`/hls/m/**`), rewriting like the
/// main playlist route. The owning content id is resolved by substring match
/// against live pool entries and may be unknown.
pub async fn proxy_multistream_playlist(
    state: &AppState,
    path: &str,
    token: &str,
) -> Result<Response, AppError> {
    let (ace_address, touch) = {
        let config = state.config.read().await;
        (
            config.app.ace_address.clone(),
            config.app.touch_on_multistream_probe,
        )
    };

    let content_id = state
        .pool
        .get_by_multistream_path(path, touch)
        .await
        .unwrap_or_default();

    let url = dedup_slashes(&format!("{ace_address}hls/m/{path}"));

    let response = match state
        .http
        .get(&url)
        .timeout(REVERSE_PROXY_TIMEOUT)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
    {
        Ok(resp) => resp,
        Err(e) => {
            if !content_id.is_empty() {
                state.quality.observe(&content_id, "").await;
            }
            return Err(map_fetch_error(&e, "/hls/m/"));
        }
    };

    let status = response.status().as_u16();
    let body_bytes = response.bytes().await.map_err(|e| {
        tracing::error!("Failed to read multistream body: {}", e);
        AppError::Internal("Failed to fetch HLS multistream".to_string())
    })?;
    let content = String::from_utf8_lossy(&body_bytes).to_string();

    if !content.contains("#EXTM3U") {
        tracing::error!("Invalid HLS multistream received for path {}", path);
        if !content_id.is_empty() {
            state.quality.observe(&content_id, "").await;
        }
        return Err(AppError::BadInput("Invalid HLS stream".to_string()));
    }

    let rewritten =
        rewrite_playlist_sources(&content, &ace_address, &state.external_url, token);

    if !content_id.is_empty() {
        state.quality.observe(&content_id, &rewritten).await;
    }

    build_response(status, HeaderMap::new(), Body::from(rewritten), None)
}

/// Proxy raw engine content (`/ace/c/**`, `/hls/c/**`): bytes, status and
/// filtered headers straight through. `/ace/c/` responses are stamped
/// `video/MP2T` for player compatibility.
pub async fn proxy_segment(
    state: &AppState,
    route_prefix: &str,
    path: &str,
) -> Result<Response, AppError> {
    metrics::HLS_SEGMENT_REQUESTS.inc();

    let ace_address = state.config.read().await.app.ace_address.clone();
    let url = dedup_slashes(&format!(
        "{ace_address}{}/{path}",
        route_prefix.trim_matches('/')
    ));

    let response = match state
        .http
        .get(&url)
        .timeout(REVERSE_PROXY_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            return Err(map_fetch_error(&e, route_prefix));
        }
    };

    let status = response.status().as_u16();
    let headers = copy_headers(response.headers());

    let force_content_type = if route_prefix.contains("/ace/c/") {
        Some(HeaderValue::from_static("video/MP2T"))
    } else {
        None
    };

    let body = Body::from_stream(response.bytes_stream());
    build_response(status, headers, body, force_content_type)
}

/// Map a reqwest failure to the gateway's error kinds.
fn map_fetch_error(e: &reqwest::Error, context: &str) -> AppError {
    if e.is_timeout() {
        tracing::error!("Reverse proxy timeout {} ({}s)", context, REVERSE_PROXY_TIMEOUT.as_secs());
        AppError::UpstreamTimeout("HLS stream timeout".to_string())
    } else if e.is_connect() {
        tracing::error!("Reverse proxy cannot connect to engine for {}", context);
        AppError::Internal("Cannot connect to engine".to_string())
    } else {
        tracing::error!("Reverse proxy failure {}: {}", context, e);
        AppError::Internal("Failed to fetch HLS stream".to_string())
    }
}

/// Copy upstream headers, dropping hop-by-hop and length/encoding fields
/// that no longer apply after rewriting.
fn copy_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        let name_str = name.as_str();
        if EXCLUDED_PROXY_HEADERS.contains(&name_str.to_lowercase().as_str()) {
            continue;
        }
        let Ok(header_name) = HeaderName::try_from(name_str) else {
            continue;
        };
        let Ok(value_str) = value.to_str() else {
            continue;
        };
        let Ok(header_value) = HeaderValue::try_from(value_str) else {
            continue;
        };
        headers.insert(header_name, header_value);
    }
    headers
}

fn build_response(
    status: u16,
    headers: HeaderMap,
    body: Body,
    force_content_type: Option<HeaderValue>,
) -> Result<Response, AppError> {
    let mut builder =
        Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));

    if let Some(builder_headers) = builder.headers_mut() {
        *builder_headers = headers;
        if let Some(content_type) = force_content_type {
            builder_headers.insert(axum::http::header::CONTENT_TYPE, content_type);
        }
    }

    builder.body(body).map_err(|e| {
        tracing::error!("Failed to build proxy response: {}", e);
        AppError::Internal("Failed to build response".to_string())
    })
}

/// Collapse duplicate slashes in the path part of a URL.
fn dedup_slashes(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let mut deduped = String::with_capacity(rest.len());
    let mut previous_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        deduped.push(c);
    }
    format!("{scheme}://{deduped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_slashes() {
        assert_eq!(
            dedup_slashes("http://ace:6878//hls/m//x/1.ts"),
            "http://ace:6878/hls/m/x/1.ts"
        );
        assert_eq!(dedup_slashes("http://ace/a/b"), "http://ace/a/b");
    }

    #[test]
    fn test_copy_headers_filters_hop_by_hop() {
        let mut upstream = reqwest::header::HeaderMap::new();
        upstream.insert("content-type", "application/vnd.apple.mpegurl".parse().unwrap());
        upstream.insert("content-length", "123".parse().unwrap());
        upstream.insert("transfer-encoding", "chunked".parse().unwrap());
        upstream.insert("x-custom", "kept".parse().unwrap());

        let copied = copy_headers(&upstream);
        assert!(copied.contains_key("content-type"));
        assert!(copied.contains_key("x-custom"));
        assert!(!copied.contains_key("content-length"));
        assert!(!copied.contains_key("transfer-encoding"));
    }
}
