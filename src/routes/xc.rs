//! Xtream-Codes protocol endpoints
//!
//! Implements the subset of the XC player API that live-TV players
//! actually call: the bare info call, live categories and live streams,
//! `get.php` playlists and `xmltv.php`. Everything else is refused with the
//! appropriate status.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

// ============================================================================
// XC wire models
// ============================================================================

#[derive(Debug, Serialize)]
pub struct XcUserInfo {
    pub username: String,
    pub password: String,
    pub message: String,
    pub auth: i32,
    pub status: String,
    pub exp_date: String,
    pub is_trial: String,
    pub active_cons: String,
    pub created_at: String,
    pub max_connections: String,
    pub allowed_output_formats: Vec<String>,
}

impl XcUserInfo {
    fn new(username: &str, password: &str) -> Self {
        let one_year_out = Utc::now().timestamp() + 365 * 24 * 60 * 60;
        Self {
            username: username.to_string(),
            password: password.to_string(),
            message: "Welcome to Ace Gateway".to_string(),
            auth: 1,
            status: "Active".to_string(),
            exp_date: one_year_out.to_string(),
            is_trial: "0".to_string(),
            active_cons: "1".to_string(),
            created_at: "5000000000".to_string(),
            max_connections: "100".to_string(),
            allowed_output_formats: vec!["m3u8".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct XcServerInfo {
    pub url: String,
    pub port: u16,
    pub https_port: Option<u16>,
    pub server_protocol: String,
    pub timezone: String,
    pub timestamp_now: i64,
    pub time_now: String,
    pub process: bool,
}

#[derive(Debug, Serialize)]
pub struct XcApiResponse {
    pub user_info: XcUserInfo,
    pub server_info: XcServerInfo,
}

#[derive(Debug, Serialize)]
pub struct XcCategory {
    pub category_id: String,
    pub category_name: String,
    pub parent_id: i32,
}

#[derive(Debug, Serialize)]
pub struct XcStream {
    pub num: i64,
    pub name: String,
    pub stream_type: String,
    pub stream_id: i64,
    pub stream_icon: String,
    pub epg_channel_id: String,
    pub added: String,
    pub is_adult: String,
    pub category_id: String,
    pub category_ids: Vec<String>,
    pub custom_sid: Option<String>,
    pub tv_archive: String,
    pub direct_source: String,
    pub tv_archive_duration: String,
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PlayerApiQuery {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub category_id: String,
}

/// GET /player_api.php
pub async fn player_api(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlayerApiQuery>,
) -> Result<Response, AppError> {
    let stream_token = state
        .tokens
        .check_xc_auth(&query.username, &query.password)
        .await?;

    match query.action.as_str() {
        "" => {
            let response = api_info_response(&state, &query.username, &query.password);
            Ok(Json(response).into_response())
        }
        "get_live_categories" => {
            let categories = live_categories(&state).await?;
            Ok(Json(categories).into_response())
        }
        "get_live_streams" => {
            let category_filter = query.category_id.parse::<i64>().ok();
            let streams = live_streams(&state, category_filter, &stream_token).await?;
            Ok(Json(streams).into_response())
        }
        "get_vod_categories" | "get_vod_streams" | "get_series_categories" | "get_series" => {
            Err(AppError::NotImplemented(format!(
                "Action '{}' is not implemented",
                query.action
            )))
        }
        action => {
            tracing::error!("XC client tried an unknown action '{}' in /player_api.php", action);
            Err(AppError::BadInput(format!("Unknown action '{action}'")))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GetPhpQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "type")]
    pub type_: String,
}

/// GET /get.php - XC playlist export.
pub async fn get_php(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GetPhpQuery>,
) -> Result<Response, AppError> {
    let stream_token = state
        .tokens
        .check_xc_auth(&query.username, &query.password)
        .await?;

    if query.type_ != "m3u_plus" {
        let body = serde_json::json!({
            "message": "Invalid request type",
            "errors": ["Expected: 'type=m3u_plus'"],
        });
        return Ok(Json(body).into_response());
    }

    let playlist = state
        .catalog
        .as_iptv_playlist(&state.external_url, &stream_token)
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

#[derive(Debug, Default, Deserialize)]
pub struct XmltvQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// GET /xmltv.php - XC-standard EPG endpoint.
pub async fn xmltv_php(
    State(state): State<Arc<AppState>>,
    Query(query): Query<XmltvQuery>,
) -> Result<Response, AppError> {
    state
        .tokens
        .check_xc_auth(&query.username, &query.password)
        .await?;

    super::iptv::condensed_epg_response(&state)
}

// ============================================================================
// Assembly
// ============================================================================

fn api_info_response(state: &AppState, username: &str, password: &str) -> XcApiResponse {
    let (protocol, port, https_port) = match url::Url::parse(&state.external_url) {
        Ok(url) => {
            let scheme = url.scheme().to_string();
            match scheme.as_str() {
                "https" => ("https".to_string(), 80, Some(url.port().unwrap_or(443))),
                _ => ("http".to_string(), url.port().unwrap_or(80), None),
            }
        }
        Err(_) => ("http".to_string(), 80, None),
    };

    let now = Utc::now();
    XcApiResponse {
        user_info: XcUserInfo::new(username, password),
        server_info: XcServerInfo {
            url: state.external_url.clone(),
            port,
            https_port,
            server_protocol: protocol,
            timezone: "UTC".to_string(),
            timestamp_now: now.timestamp(),
            time_now: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            process: true,
        },
    }
}

/// Categories actually in use by catalog entries.
async fn live_categories(state: &AppState) -> Result<Vec<XcCategory>, AppError> {
    let streams = state.catalog.streams_cached().await?;

    let mut in_use: Vec<i64> = Vec::new();
    for stream in streams.iter() {
        let id = state.catalog.xc_category_id(&stream.group_title).await?;
        if !in_use.contains(&id) {
            in_use.push(id);
        }
    }

    let categories = state
        .catalog
        .xc_categories_all()
        .await?
        .into_iter()
        .filter(|category| in_use.contains(&category.xc_category_id))
        .map(|category| XcCategory {
            category_id: category.xc_category_id.to_string(),
            category_name: category.category,
            parent_id: 0,
        })
        .collect();

    Ok(categories)
}

async fn live_streams(
    state: &AppState,
    category_filter: Option<i64>,
    token: &str,
) -> Result<Vec<XcStream>, AppError> {
    let streams = state.catalog.streams_cached().await?;
    let token_suffix = if token.is_empty() {
        String::new()
    } else {
        format!("?token={token}")
    };

    let mut result = Vec::new();
    for (n, stream) in streams.iter().enumerate() {
        let category_id = state.catalog.xc_category_id(&stream.group_title).await?;
        if category_filter.is_some() && category_filter != Some(category_id) {
            continue;
        }

        let stream_icon = match stream.tvg_logo.as_deref().filter(|logo| !logo.is_empty()) {
            Some(logo) => format!("{}/tvg-logo/{logo}{token_suffix}", state.external_url),
            None => String::new(),
        };

        result.push(XcStream {
            num: (n + 1) as i64,
            name: stream.title.clone(),
            stream_type: "live".to_string(),
            stream_id: stream.xc_id,
            stream_icon,
            epg_channel_id: stream.tvg_id.clone(),
            added: "1500000000".to_string(),
            is_adult: "0".to_string(),
            category_id: category_id.to_string(),
            category_ids: vec![category_id.to_string()],
            custom_sid: None,
            tv_archive: "0".to_string(),
            direct_source: String::new(),
            tv_archive_duration: "0".to_string(),
        });
    }

    Ok(result)
}
