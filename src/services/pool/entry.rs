//! One live playback session on the engine
//!
//! Entries own their middleware URLs and the lock-in state machine. An entry
//! that has served for five minutes earns lock-in, which decays as the entry
//! sits idle; a freshly created entry only goes stale after fifteen unused
//! minutes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use tokio::sync::RwLock;

use crate::util::hls::last_segment_url;
use crate::util::ids::ace_id_short;

use super::models::{MiddlewareEnvelope, MiddlewareInfo, StatEnvelope};

pub const LOCK_IN_TIME: Duration = Duration::minutes(5);
pub const LOCK_IN_RESET_MAX: Duration = Duration::minutes(15);

/// Total timeout for every engine API call made from the pool.
pub const ACE_API_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug)]
pub struct PoolEntry {
    pub ace_pid: u32,
    pub content_id: String,
    pub infohash: Option<String>,
    pub date_started: DateTime<Utc>,
    middleware_url: String,
    middleware: RwLock<Option<MiddlewareInfo>>,
    last_used: Mutex<DateTime<Utc>>,
    keep_alive_logged: AtomicBool,
}

impl PoolEntry {
    pub fn new(
        ace_pid: u32,
        ace_address: &str,
        content_id: &str,
        infohash: Option<String>,
        transcode_audio: bool,
    ) -> Self {
        let middleware_url = format!(
            "{}ace/manifest.m3u8?format=json&content_id={}&transcode_ac3={}&pid={}",
            ace_address, content_id, transcode_audio, ace_pid
        );

        let now = Utc::now();
        Self {
            ace_pid,
            content_id: content_id.to_string(),
            infohash,
            date_started: now,
            middleware_url,
            middleware: RwLock::new(None),
            last_used: Mutex::new(now),
            keep_alive_logged: AtomicBool::new(false),
        }
    }

    /// Fetch (or refresh) the middleware info for this session. A failure
    /// leaves any previous info in place.
    pub async fn populate_urls(&self, http: &Client) {
        let envelope = match http
            .get(&self.middleware_url)
            .timeout(ACE_API_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => match resp.json::<MiddlewareEnvelope>().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        "Failed to decode middleware response for {}: {}",
                        ace_id_short(&self.content_id),
                        e
                    );
                    return;
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to fetch middleware info for {}: {}",
                    ace_id_short(&self.content_id),
                    e
                );
                return;
            }
        };

        if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
            tracing::error!(
                "Engine middleware error for {}: {}",
                ace_id_short(&self.content_id),
                error
            );
            return;
        }

        if let Some(info) = envelope.response {
            *self.middleware.write().await = Some(info);
        }
    }

    pub fn update_last_used(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Utc::now();
        }
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now())
    }

    /// The engine-side HLS playlist URL, if the session started successfully.
    pub async fn playback_url(&self) -> Option<String> {
        self.middleware
            .read()
            .await
            .as_ref()
            .map(|info| info.playback_url.clone())
    }

    pub async fn command_url(&self) -> Option<String> {
        self.middleware
            .read()
            .await
            .as_ref()
            .map(|info| info.command_url.clone())
    }

    pub async fn stat_url(&self) -> Option<String> {
        self.middleware
            .read()
            .await
            .as_ref()
            .map(|info| info.stat_url.clone())
    }

    // ========================================================================
    // Lock-in state machine
    // ========================================================================

    fn running_long_enough_to_lock_in(&self) -> bool {
        Utc::now() - self.date_started > LOCK_IN_TIME
    }

    /// How long the entry must stay idle before it unlocks: the time it has
    /// accumulated while actively watched, capped at the reset maximum.
    pub fn required_time_until_unlock(&self) -> Duration {
        let now = Utc::now();
        let idle = now - self.last_used();
        let running = now - self.date_started;
        LOCK_IN_RESET_MAX.min(running - idle)
    }

    pub fn time_until_unlock(&self) -> Duration {
        self.last_used() + self.required_time_until_unlock() - Utc::now()
    }

    pub fn locked_in(&self) -> bool {
        if !self.running_long_enough_to_lock_in() {
            return false;
        }
        let idle = Utc::now() - self.last_used();
        idle <= self.required_time_until_unlock()
    }

    /// A stale entry is torn down by the poolboy: either an old entry whose
    /// lock-in has fully decayed, or a young one that has sat unused past the
    /// reset maximum.
    pub fn is_stale(&self) -> bool {
        let ran_long_enough = self.running_long_enough_to_lock_in();
        let unlocked = !self.locked_in();
        let decayed = self.time_until_unlock() < Duration::seconds(1);
        let idle_past_reset = Utc::now() - self.last_used() > LOCK_IN_RESET_MAX;

        if ran_long_enough && unlocked && decayed {
            tracing::debug!(
                "Old ace_pid {} with content_id {} is stale",
                self.ace_pid,
                ace_id_short(&self.content_id)
            );
            return true;
        }

        if !ran_long_enough && idle_past_reset {
            tracing::debug!(
                "New-ish and unused ace_pid {} with content_id {} is stale",
                self.ace_pid,
                ace_id_short(&self.content_id)
            );
            return true;
        }

        false
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Keep the engine session warm: refresh middleware info, touch the
    /// playlist, then touch its newest segment. All errors are swallowed,
    /// this is speculative IO driven by the poolboy.
    pub async fn keep_alive(&self, http: &Client) {
        self.populate_urls(http).await;

        let playback_url = match self.playback_url().await {
            Some(url) if !url.is_empty() => url,
            _ => {
                tracing::warn!(
                    "No middleware info for {}, cannot keep alive",
                    ace_id_short(&self.content_id)
                );
                return;
            }
        };

        if self.is_stale() {
            tracing::trace!("Not keeping alive {}, stale", ace_id_short(&self.content_id));
            return;
        }

        if !self.keep_alive_logged.swap(true, Ordering::Relaxed) {
            tracing::info!(
                "Keeping alive ace_pid {} with content_id {}",
                self.ace_pid,
                ace_id_short(&self.content_id)
            );
        }

        let playlist = match http
            .get(&playback_url)
            .timeout(ACE_API_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.text().await.unwrap_or_default(),
            Err(e) => {
                tracing::trace!("Keep alive playlist fetch failed: {}", e);
                return;
            }
        };

        if let Some(segment_url) = last_segment_url(&playlist, &playback_url) {
            if let Err(e) = http
                .get(&segment_url)
                .timeout(ACE_API_TIMEOUT)
                .send()
                .await
            {
                tracing::trace!("Keep alive segment fetch failed: {}", e);
            }
        }
    }

    /// Fetch the engine's stat object for this session.
    pub async fn fetch_stat(&self, http: &Client) -> Option<StatEnvelope> {
        let stat_url = self.stat_url().await?;

        let resp = match http
            .get(&stat_url)
            .timeout(ACE_API_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => resp,
            Err(_) => return None,
        };

        match resp.json::<StatEnvelope>().await {
            Ok(stat) => Some(stat),
            Err(e) => {
                tracing::error!(
                    "Failed to parse engine stat for {}: {} (did the engine API change?)",
                    ace_id_short(&self.content_id),
                    e
                );
                None
            }
        }
    }

    /// Ask the engine to stop this session. Failure is logged, never
    /// propagated; the pool drops the entry regardless.
    pub async fn stop(&self, http: &Client) {
        let command_url = match self.command_url().await {
            Some(url) => url,
            None => {
                tracing::warn!(
                    "No command URL for {}, cannot stop session",
                    ace_id_short(&self.content_id)
                );
                return;
            }
        };

        let url = format!("{command_url}?method=stop");
        match http.get(&url).timeout(ACE_API_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(
                    "Stopped engine session for content_id {}",
                    ace_id_short(&self.content_id)
                );
            }
            Ok(resp) => {
                tracing::error!(
                    "Engine refused stop for {}: {}",
                    ace_id_short(&self.content_id),
                    resp.status()
                );
            }
            Err(e) => {
                tracing::error!(
                    "Failed to stop engine session for {}: {}",
                    ace_id_short(&self.content_id),
                    e
                );
            }
        }
    }

    /// Test-only hook for exercising the lock-in state machine.
    #[cfg(test)]
    pub fn with_times(mut self, started: DateTime<Utc>, last_used: DateTime<Utc>) -> Self {
        self.date_started = started;
        self.last_used = Mutex::new(last_used);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn entry(started_mins_ago: i64, used_mins_ago: i64) -> PoolEntry {
        let now = Utc::now();
        PoolEntry::new(1, "http://ace:6878/", CID, None, false).with_times(
            now - Duration::minutes(started_mins_ago),
            now - Duration::minutes(used_mins_ago),
        )
    }

    #[test]
    fn test_middleware_url_shape() {
        let entry = PoolEntry::new(3, "http://ace:6878/", CID, None, true);
        assert_eq!(
            entry.middleware_url,
            format!(
                "http://ace:6878/ace/manifest.m3u8?format=json&content_id={CID}&transcode_ac3=true&pid=3"
            )
        );
    }

    #[test]
    fn test_active_old_entry_is_locked_in() {
        let entry = entry(10, 1);
        assert!(entry.locked_in());
        assert!(!entry.is_stale());
    }

    #[test]
    fn test_old_idle_entry_is_stale() {
        // Started 10 minutes ago, never used since: idle equals runtime, so
        // required unlock time is zero and the entry is both unlocked and
        // fully decayed
        let entry = entry(10, 10);
        assert!(!entry.locked_in());
        assert!(entry.is_stale());
    }

    #[test]
    fn test_young_but_abandoned_entry_is_stale() {
        let entry = entry(3, 16);
        assert!(!entry.locked_in());
        assert!(entry.is_stale());
    }

    #[test]
    fn test_young_active_entry_neither_locked_nor_stale() {
        let entry = entry(3, 0);
        assert!(!entry.locked_in());
        assert!(!entry.is_stale());
    }

    #[test]
    fn test_required_unlock_capped() {
        // Watched for a very long time: unlock requirement caps at 15 min
        let entry = entry(600, 1);
        assert_eq!(entry.required_time_until_unlock(), LOCK_IN_RESET_MAX);
    }
}
