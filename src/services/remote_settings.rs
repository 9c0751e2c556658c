//! Remote settings fetcher
//!
//! Periodically fetches a JSON document shaped like the application config
//! and applies its `scraper` and `epgs` sections. Identical payloads are a
//! no-op; anything else is validated, backed up, written, and pushed into
//! the running scraper and EPG merger. Secrets are never replaced.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigExport};
use crate::AppState;

const REMOTE_SETTINGS_FETCH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Apply a config export to the running services. Returns true when the
/// config actually changed. Validation failures leave the old config in
/// force.
pub async fn apply_export(state: &AppState, export: ConfigExport) -> anyhow::Result<bool> {
    let mut candidate = state.config.read().await.clone();
    candidate.scraper = export.scraper;
    candidate.epgs = export.epgs;
    candidate.normalise();
    if let Err(errors) = candidate.validate() {
        anyhow::bail!("Invalid settings: {}", errors.join("; "));
    }

    {
        let current = state.config.read().await;
        let unchanged = serde_json::to_value(current.export())? == serde_json::to_value(candidate.export())?;
        if unchanged {
            tracing::info!("Settings are identical to the current config; no update needed");
            return Ok(false);
        }
    }

    {
        let mut config = state.config.write().await;
        *config = candidate.clone();
        config.save(&state.paths)?;
    }

    state.scraper.set_config(candidate.scraper.clone()).await;
    state.epg.set_sources(&candidate.epgs).await;

    tracing::info!("Applied new scraper/EPG settings");
    Ok(true)
}

/// One fetch of the remote settings URL, if configured.
pub async fn fetch_settings(state: &AppState) -> anyhow::Result<bool> {
    let url = state.config.read().await.remote_settings_url.clone();
    let Some(url) = url.filter(|url| !url.is_empty()) else {
        tracing::trace!("Remote settings URL is not set; skipping fetch");
        return Ok(false);
    };

    tracing::info!("Fetching remote settings from {}", url);

    let body = state
        .http
        .get(&url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    // The remote document is a full config; only scraper and EPG sections
    // are ever taken from it
    let remote: AppConfig = serde_json::from_str(&body)?;
    apply_export(state, remote.export()).await
}

/// Spawn the daily remote-settings task.
pub fn spawn_remote_settings(state: Arc<AppState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tracing::info!("Remote settings fetcher started");
        loop {
            if let Err(e) = fetch_settings(&state).await {
                tracing::error!("Failed to fetch remote settings: {}", e);
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Remote settings fetcher stopping");
                    break;
                }
                _ = tokio::time::sleep(REMOTE_SETTINGS_FETCH_INTERVAL) => {}
            }
        }
    });
}
