//! Wire models for the engine's middleware and stat endpoints

use serde::{Deserialize, Serialize};

/// Payload of `/ace/manifest.m3u8?format=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareEnvelope {
    pub response: Option<MiddlewareInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareInfo {
    pub playback_url: String,
    pub stat_url: String,
    pub command_url: String,
    #[serde(default)]
    pub infohash: Option<String>,
    #[serde(default)]
    pub playback_session_id: Option<String>,
    #[serde(default)]
    pub is_live: Option<i64>,
    #[serde(default)]
    pub is_encrypted: Option<i64>,
    #[serde(default)]
    pub client_session_id: Option<i64>,
}

/// Payload of the per-session stat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatEnvelope {
    pub response: Option<StatResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub peers: Option<i64>,
    #[serde(default)]
    pub speed_down: Option<i64>,
    #[serde(default)]
    pub speed_up: Option<i64>,
    #[serde(default)]
    pub downloaded: Option<i64>,
    #[serde(default)]
    pub uploaded: Option<i64>,
    #[serde(default)]
    pub total_progress: Option<i64>,
    #[serde(default)]
    pub stream_status: Option<i64>,
    #[serde(default)]
    pub is_live: Option<i64>,
    #[serde(default)]
    pub is_encrypted: Option<i64>,
    #[serde(default)]
    pub infohash: Option<String>,
    #[serde(default)]
    pub playback_session_id: Option<String>,
    #[serde(default)]
    pub client_session_id: Option<i64>,
    #[serde(default)]
    pub livepos: Option<serde_json::Value>,
    #[serde(default)]
    pub disk_cache_stats: Option<serde_json::Value>,
}

/// Version payload of `/webui/api/service?method=get_version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEnvelope {
    #[serde(default)]
    pub result: Option<VersionResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionResult {
    #[serde(default)]
    pub version: String,
}

/// Derived per-entry view for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryView {
    pub ace_pid: u32,
    pub content_id: String,
    pub infohash: Option<String>,
    pub date_started: chrono::DateTime<chrono::Utc>,
    pub last_used: chrono::DateTime<chrono::Utc>,
    pub locked_in: bool,
    pub time_until_unlock_secs: i64,
    pub time_running_secs: i64,
    pub hls_url: Option<String>,
}

/// Pool-level view for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct PoolView {
    pub ace_address: String,
    pub ace_version: String,
    pub max_size: u32,
    pub healthy: bool,
    pub transcode_audio: bool,
    pub external_url: String,
    pub entries: Vec<PoolEntryView>,
}
