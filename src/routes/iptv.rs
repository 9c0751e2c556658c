//! IPTV playlist and EPG output routes

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

use super::TokenQuery;

/// GET /iptv, /iptv.m3u, /iptv.m3u8 - the full catalog as an M3U playlist.
pub async fn iptv_playlist(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;

    let playlist = state
        .catalog
        .as_iptv_playlist(&state.external_url, &query.token)
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.apple.mpegurl"),
        )
        .body(Body::from(playlist))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// GET /epg.xml - the condensed XMLTV guide.
pub async fn epg_xml(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state.tokens.verify(&query.token).await?;
    condensed_epg_response(&state)
}

/// Shared condensed-EPG response builder, also used by the XC route.
pub fn condensed_epg_response(state: &AppState) -> Result<Response, AppError> {
    let condensed = state.epg.condensed_bytes();

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        )
        .header(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"condensed_epg.xml\""),
        )
        .body(Body::from(condensed.to_vec()))
        .map_err(|e| AppError::Internal(e.to_string()))
}
