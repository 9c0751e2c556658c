//! Management endpoints: config, scraper sources, overrides, pool and EPG
//! introspection
//!
//! All routes here are guarded by the admin key (query `key` or
//! `x-admin-key` header). Stream-token auth does not apply.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::{ApiSource, ConfigExport, HtmlFilter, HtmlSource, IptvSource, TitleFilter};
use crate::error::AppError;
use crate::services::{quality, remote_settings};
use crate::util::ids::is_valid_ace_id;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AdminQuery {
    #[serde(default)]
    pub key: String,
}

fn check_admin(state: &AppState, query: &AdminQuery, headers: &HeaderMap) -> Result<(), AppError> {
    if state.admin_key.is_empty() {
        return Err(AppError::Unauthorized(
            "Admin key is not configured".to_string(),
        ));
    }

    let header_key = headers
        .get("x-admin-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if query.key == state.admin_key || header_key == state.admin_key {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid or missing admin key".to_string()))
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn message(text: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.into(),
    })
}

// ============================================================================
// Config
// ============================================================================

/// GET /api/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    let config = state.config.read().await.clone();
    Ok(Json(config))
}

/// PUT /api/config - replace the scraper/EPG sections.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(export): Json<ConfigExport>,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    match remote_settings::apply_export(&state, export).await {
        Ok(true) => Ok(message("Configuration updated")),
        Ok(false) => Ok(message("Configuration unchanged")),
        Err(e) => Err(AppError::BadInput(e.to_string())),
    }
}

// ============================================================================
// Scraper sources
// ============================================================================

/// GET /api/scraper/sources
pub async fn get_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    Ok(Json(state.scraper.sources_flat().await))
}

#[derive(Debug, Deserialize)]
pub struct NewSourceBody {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub title_filter: TitleFilter,
    #[serde(default)]
    pub html_filter: Option<HtmlFilter>,
}

/// POST /api/scraper/sources - add a source of any type.
pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(body): Json<NewSourceBody>,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    let mut export = state.config.read().await.export();
    match body.source_type.as_str() {
        "html" => export.scraper.html.push(HtmlSource {
            name: body.name,
            url: body.url,
            title_filter: body.title_filter,
            html_filter: body.html_filter.unwrap_or_default(),
        }),
        "iptv" => export.scraper.iptv_m3u8.push(IptvSource {
            name: body.name,
            url: body.url,
            title_filter: body.title_filter,
        }),
        "api" => export.scraper.api.push(ApiSource {
            name: body.name,
            url: body.url,
            title_filter: body.title_filter,
        }),
        other => {
            return Err(AppError::BadInput(format!("Unknown source type '{other}'")));
        }
    }

    match remote_settings::apply_export(&state, export).await {
        Ok(_) => Ok(message("Source added")),
        Err(e) => Err(AppError::BadInput(e.to_string())),
    }
}

/// DELETE /api/scraper/sources/:name - remove a source by slug.
pub async fn remove_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    let mut export = state.config.read().await.export();
    let before = export.scraper.html.len()
        + export.scraper.iptv_m3u8.len()
        + export.scraper.api.len();

    export.scraper.html.retain(|site| site.name != name);
    export.scraper.iptv_m3u8.retain(|site| site.name != name);
    export.scraper.api.retain(|site| site.name != name);

    let after = export.scraper.html.len()
        + export.scraper.iptv_m3u8.len()
        + export.scraper.api.len();
    if before == after {
        return Err(AppError::NotFound(format!("Source not found: {name}")));
    }

    match remote_settings::apply_export(&state, export).await {
        Ok(_) => Ok(message("Source removed")),
        Err(e) => Err(AppError::BadInput(e.to_string())),
    }
}

// ============================================================================
// Title overrides
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub name: String,
}

/// PUT /api/overrides/:content_id - set a content-id (or infohash) title
/// override.
pub async fn put_override(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(body): Json<OverrideBody>,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    if !is_valid_ace_id(&content_id) {
        return Err(AppError::BadInput(format!(
            "Invalid content ID or infohash: {content_id}"
        )));
    }

    let mut export = state.config.read().await.export();
    export
        .scraper
        .content_id_name_overrides
        .insert(content_id, body.name);

    match remote_settings::apply_export(&state, export).await {
        Ok(_) => Ok(message("Override saved")),
        Err(e) => Err(AppError::BadInput(e.to_string())),
    }
}

/// DELETE /api/overrides/:content_id
pub async fn delete_override(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    let mut export = state.config.read().await.export();
    if export
        .scraper
        .content_id_name_overrides
        .remove(&content_id)
        .is_none()
    {
        return Err(AppError::NotFound(format!(
            "No override for content ID {content_id}"
        )));
    }

    match remote_settings::apply_export(&state, export).await {
        Ok(_) => Ok(message("Override removed")),
        Err(e) => Err(AppError::BadInput(e.to_string())),
    }
}

// ============================================================================
// Remote settings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RemoteSettingsBody {
    pub url: Option<String>,
}

/// GET /api/remote-settings
pub async fn get_remote_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    let url = state.config.read().await.remote_settings_url.clone();
    Ok(Json(serde_json::json!({ "url": url })))
}

/// PUT /api/remote-settings - change the remote settings URL and fetch it
/// immediately.
pub async fn put_remote_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(body): Json<RemoteSettingsBody>,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    if let Some(ref url) = body.url {
        if url::Url::parse(url).is_err() {
            return Err(AppError::BadInput(format!("Invalid URL: {url}")));
        }
    }

    {
        let mut config = state.config.write().await;
        config.remote_settings_url = body.url.clone();
        config.save(&state.paths).map_err(AppError::from)?;
    }

    let fetch_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = remote_settings::fetch_settings(&fetch_state).await {
            tracing::error!("Remote settings fetch after URL change failed: {}", e);
        }
    });

    Ok(message("Remote settings URL updated"))
}

// ============================================================================
// Pool introspection
// ============================================================================

/// GET /api/pool
pub async fn get_pool(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    Ok(Json(state.pool.view().await))
}

/// DELETE /api/pool/:content_id - tear down a live session.
pub async fn delete_pool_entry(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    if state.pool.remove_by_content_id(&content_id, "admin").await {
        Ok(message("Pool entry removed"))
    } else {
        Err(AppError::NotFound(format!(
            "No pool entry for content ID {content_id}"
        )))
    }
}

/// GET /api/pool/stats/pid/:pid - proxy the engine stat endpoint.
pub async fn pool_stats_by_pid(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<u32>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    match state.pool.stats_by_pid(pid).await {
        Some(stat) => Ok(Json(stat)),
        None => Err(AppError::NotFound(format!("No stats for pid {pid}"))),
    }
}

/// GET /api/pool/stats/content/:content_id
pub async fn pool_stats_by_content_id(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    match state.pool.stats_by_content_id(&content_id).await {
        Some(stat) => Ok(Json(stat)),
        None => Err(AppError::NotFound(format!(
            "No stats for content ID {content_id}"
        ))),
    }
}

// ============================================================================
// Quality & EPG
// ============================================================================

/// POST /api/quality/recheck - start the single-flight quality sweep.
pub async fn start_quality_recheck(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    if quality::spawn_recheck(Arc::clone(&state), 1, 10) {
        Ok(message("Quality recheck started"))
    } else {
        Err(AppError::Conflict("Quality recheck already running".to_string()))
    }
}

/// GET /api/epg/health
pub async fn epg_health(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    Ok(Json(state.epg.health_view().await))
}

/// GET /api/epg/mappings - tvg-id to winning source URL.
pub async fn epg_mappings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;
    Ok(Json(state.epg.tvg_epg_mappings()))
}

// ============================================================================
// Streams introspection
// ============================================================================

/// GET /api/streams - the catalog with quality annotations.
pub async fn get_streams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    #[derive(Serialize)]
    struct StreamView {
        xc_id: i64,
        content_id: String,
        infohash: Option<String>,
        title: String,
        tvg_id: String,
        tvg_logo: Option<String>,
        group_title: String,
        sites_found_on: Vec<String>,
        quality: i64,
        has_ever_worked: bool,
    }

    let streams = state.catalog.streams_cached().await?;
    let mut views = Vec::with_capacity(streams.len());
    for stream in streams.iter() {
        let quality = state.quality.get(&stream.content_id).await;
        views.push(StreamView {
            xc_id: stream.xc_id,
            content_id: stream.content_id.clone(),
            infohash: stream.infohash.clone(),
            title: stream.title.clone(),
            tvg_id: stream.tvg_id.clone(),
            tvg_logo: stream.tvg_logo.clone(),
            group_title: stream.group_title.clone(),
            sites_found_on: stream.sites(),
            quality: quality.score,
            has_ever_worked: quality.has_ever_worked,
        });
    }

    Ok(Json(views))
}

/// DELETE /api/streams/:content_id - drop a catalog entry.
pub async fn delete_stream(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_admin(&state, &query, &headers)?;

    if state.catalog.delete_by_content_id(&content_id).await? {
        Ok(message("Stream deleted"))
    } else {
        Err(AppError::NotFound(format!(
            "No catalog entry for content ID {content_id}"
        )))
    }
}
