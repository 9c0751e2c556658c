//! Stream-facing routes: playlist proxy, segment proxy, XC path-style
//! resolution and channel logos

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::services::hls_proxy;
use crate::AppState;

use super::TokenQuery;

/// 1x1 transparent PNG served when a channel has no logo on disk.
const DEFAULT_TVG_LOGO: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// GET /hls/:id?token= - reverse proxy the HLS playlist from the engine.
pub async fn hls_playlist(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;
    hls_proxy::proxy_playlist(&state, &path, &query.token).await
}

/// GET /hls/m/*path?token= - reverse proxy the engine's multistream playlist.
pub async fn hls_multistream(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;
    hls_proxy::proxy_multistream_playlist(&state, &path, &query.token).await
}

/// GET /hls/c/*path?token= - proxy engine content bytes.
pub async fn hls_content(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;
    hls_proxy::proxy_segment(&state, "/hls/c/", &path).await
}

/// GET /ace/c/*path?token= - proxy engine content bytes, stamped MP2T.
pub async fn ace_content(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;
    hls_proxy::proxy_segment(&state, "/ace/c/", &path).await
}

#[derive(Debug, Default, Deserialize)]
pub struct XcStreamQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// GET /:username/:password/:xc_stream and /live/... - XC-style stream URL.
///
/// The stream segment is an XC id with an optional file extension
/// (`123.m3u8`, `123.ts`, bare `123` depending on the player). It resolves
/// to a content id through the catalog and reuses the playlist proxy.
pub async fn xc_stream(
    State(state): State<Arc<AppState>>,
    Path((path_username, path_password, xc_stream)): Path<(String, String, String)>,
    Query(query): Query<XcStreamQuery>,
) -> Result<Response, AppError> {
    // Some clients repeat credentials in the query string; path wins
    let username = if path_username.is_empty() {
        query.username
    } else {
        path_username
    };
    let password = if path_password.is_empty() {
        query.password
    } else {
        path_password
    };

    let stream_token = state.tokens.check_xc_auth(&username, &password).await?;

    let xc_id_clean = xc_stream.split('.').next().unwrap_or_default();
    let xc_id: i64 = xc_id_clean.parse().map_err(|_| {
        AppError::BadInput(format!(
            "Client requested invalid XC ID: {xc_stream} -> {xc_id_clean}"
        ))
    })?;

    let content_id = state
        .catalog
        .content_id_by_xc_id(xc_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Content ID not found for the given XC ID".to_string()))?;

    hls_proxy::proxy_playlist(&state, &content_id, &stream_token).await
}

/// GET /tvg-logo/:path?token= - serve a stored channel logo, or the default.
pub async fn tvg_logo(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;

    if path.contains("..") || path.contains('/') {
        return Err(AppError::BadInput("Invalid logo path".to_string()));
    }

    let logo_path = state.paths.tvg_logos_dir().join(&path);
    let (bytes, content_type) = match tokio::fs::read(&logo_path).await {
        Ok(bytes) => (bytes, content_type_for(&path)),
        Err(_) => (DEFAULT_TVG_LOGO.to_vec(), "image/png"),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
        .header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        )
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.webp"), "image/webp");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }

    #[test]
    fn test_default_logo_is_a_png() {
        assert_eq!(&DEFAULT_TVG_LOGO[..8], b"\x89PNG\r\n\x1a\n");
    }
}
