//! Bounded pool of engine playback sessions
//!
//! The pool multiplexes every client onto at most `max_size` engine
//! sessions. Allocation reuses a live entry for the same content id, then a
//! free pid, then evicts the least-recently-used entry that is not locked
//! in. The poolboy task owns all other mutation: staleness teardown and
//! keep-alive.

pub mod entry;
pub mod models;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::util::ids::{ace_id_short, is_valid_ace_id};

pub use entry::PoolEntry;
use models::{PoolEntryView, PoolView, StatEnvelope, VersionEnvelope};

const POOLBOY_INTERVAL: Duration = Duration::from_secs(10);

pub struct AcePool {
    ace_address: String,
    max_size: u32,
    transcode_audio: bool,
    external_url: String,
    http: Client,
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
    /// Serialises allocation so two requests for the same stream cannot both
    /// create a session. Keep-alive IO never holds this.
    alloc_lock: Mutex<()>,
    healthy: AtomicBool,
    ace_version: StdMutex<String>,
}

impl AcePool {
    pub fn new(
        http: Client,
        ace_address: String,
        max_size: u32,
        transcode_audio: bool,
        external_url: String,
    ) -> Self {
        Self {
            ace_address,
            max_size,
            transcode_audio,
            external_url,
            http,
            entries: RwLock::new(HashMap::new()),
            alloc_lock: Mutex::new(()),
            healthy: AtomicBool::new(false),
            ace_version: StdMutex::new("unknown".to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Probe the engine version endpoint and refresh the health flag.
    pub async fn check_ace_running(&self) -> bool {
        let url = format!("{}webui/api/service?method=get_version", self.ace_address);

        let healthy = match self
            .http
            .get(&url)
            .timeout(entry::ACE_API_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => match resp.json::<VersionEnvelope>().await {
                Ok(envelope) => {
                    let version = envelope
                        .result
                        .map(|r| r.version)
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| "unknown".to_string());
                    if let Ok(mut guard) = self.ace_version.lock() {
                        *guard = version;
                    }
                    if !self.is_healthy() {
                        tracing::info!("Engine at {} is healthy", self.ace_address);
                    }
                    true
                }
                Err(e) => {
                    tracing::error!("Engine at {} returned a bad version payload: {}", self.ace_address, e);
                    false
                }
            },
            Err(e) => {
                tracing::error!("Engine at {} is not healthy: {}", self.ace_address, e);
                false
            }
        };

        self.healthy.store(healthy, Ordering::Relaxed);
        healthy
    }

    pub fn ace_version(&self) -> String {
        self.ace_version
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Resolve a content id to the engine's HLS playlist URL, creating a
    /// session on miss. Returns None when the pool is full of locked-in
    /// entries or the engine refused the session.
    pub async fn get_hls_url(&self, content_id: &str) -> Option<String> {
        if !is_valid_ace_id(content_id) {
            tracing::error!("Invalid content id requested from pool: {}", content_id);
            return None;
        }

        if let Some(existing) = self.entries.read().await.get(content_id) {
            existing.update_last_used();
            return existing.playback_url().await;
        }

        let _guard = self.alloc_lock.lock().await;

        // A concurrent request may have created the entry while we waited
        if let Some(existing) = self.entries.read().await.get(content_id) {
            existing.update_last_used();
            return existing.playback_url().await;
        }

        let ace_pid = self.available_pid().await?;

        let new_entry = Arc::new(PoolEntry::new(
            ace_pid,
            &self.ace_address,
            content_id,
            None,
            self.transcode_audio,
        ));
        // Construction (including the middleware fetch) completes before the
        // entry is published to the live set
        new_entry.populate_urls(&self.http).await;

        self.entries
            .write()
            .await
            .insert(content_id.to_string(), Arc::clone(&new_entry));

        new_entry.playback_url().await
    }

    /// Next free pid in `[1, max_size]`, evicting the least-recently-used
    /// unlocked entry when every pid is taken.
    async fn available_pid(&self) -> Option<u32> {
        let entries = self.entries.read().await;
        let used: Vec<u32> = entries.values().map(|e| e.ace_pid).collect();

        for pid in 1..=self.max_size {
            if !used.contains(&pid) {
                return Some(pid);
            }
        }

        let reclaim = entries
            .values()
            .filter(|e| !e.locked_in())
            .min_by_key(|e| e.last_used())
            .map(|e| (e.ace_pid, e.content_id.clone()));
        drop(entries);

        match reclaim {
            Some((ace_pid, content_id)) => {
                tracing::info!("Reclaiming pool pid {} from {}", ace_pid, ace_id_short(&content_id));
                metrics::POOL_EVICTIONS.inc();
                self.remove_by_content_id(&content_id, "available_pid").await;
                Some(ace_pid)
            }
            None => {
                tracing::error!("Pool is full, every entry is locked in");
                None
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop the engine session and drop the entry. The only way entries
    /// leave the pool.
    pub async fn remove_by_content_id(&self, content_id: &str, caller: &str) -> bool {
        let removed = self.entries.write().await.remove(content_id);
        match removed {
            Some(entry) => {
                tracing::info!(
                    "{}: removing pool entry for content_id {}",
                    caller,
                    ace_id_short(content_id)
                );
                entry.stop(&self.http).await;
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn get_by_content_id(&self, content_id: &str) -> Option<Arc<PoolEntry>> {
        self.entries.read().await.get(content_id).cloned()
    }

    pub async fn get_by_pid(&self, ace_pid: u32) -> Option<Arc<PoolEntry>> {
        self.entries
            .read()
            .await
            .values()
            .find(|e| e.ace_pid == ace_pid)
            .cloned()
    }

    /// Find the entry whose playback URL contains the given multistream path
    /// fragment. Optionally refreshes the entry's last-used time.
    pub async fn get_by_multistream_path(&self, path: &str, touch: bool) -> Option<String> {
        let fragment = path.split('/').next().unwrap_or_default();
        if fragment.is_empty() {
            tracing::warn!("Empty multistream path provided");
            return None;
        }

        let entries: Vec<Arc<PoolEntry>> = self.entries.read().await.values().cloned().collect();
        for entry in entries {
            if let Some(url) = entry.playback_url().await {
                if url.contains(fragment) {
                    if touch {
                        entry.update_last_used();
                    }
                    return Some(entry.content_id.clone());
                }
            }
        }

        None
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub async fn stats_by_pid(&self, ace_pid: u32) -> Option<StatEnvelope> {
        if !self.is_healthy() {
            tracing::error!("Pool is not healthy, cannot get stats");
            return None;
        }
        let entry = self.get_by_pid(ace_pid).await?;
        entry.fetch_stat(&self.http).await
    }

    pub async fn stats_by_content_id(&self, content_id: &str) -> Option<StatEnvelope> {
        if !self.is_healthy() {
            tracing::error!("Pool is not healthy, cannot get stats");
            return None;
        }
        let entry = self.get_by_content_id(content_id).await?;
        entry.fetch_stat(&self.http).await
    }

    // ========================================================================
    // Management API views
    // ========================================================================

    pub async fn view(&self) -> PoolView {
        let entries: Vec<Arc<PoolEntry>> = self.entries.read().await.values().cloned().collect();

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            views.push(self.entry_view(&entry).await);
        }
        views.sort_by_key(|v| v.ace_pid);

        PoolView {
            ace_address: self.ace_address.clone(),
            ace_version: self.ace_version(),
            max_size: self.max_size,
            healthy: self.is_healthy(),
            transcode_audio: self.transcode_audio,
            external_url: self.external_url.clone(),
            entries: views,
        }
    }

    async fn entry_view(&self, entry: &PoolEntry) -> PoolEntryView {
        let locked_in = entry.locked_in();
        let time_until_unlock = if locked_in {
            entry.time_until_unlock().num_seconds().max(0)
        } else {
            0
        };

        PoolEntryView {
            ace_pid: entry.ace_pid,
            content_id: entry.content_id.clone(),
            infohash: entry.infohash.clone(),
            date_started: entry.date_started,
            last_used: entry.last_used(),
            locked_in,
            time_until_unlock_secs: time_until_unlock,
            time_running_secs: (chrono::Utc::now() - entry.date_started).num_seconds(),
            hls_url: entry.playback_url().await,
        }
    }
}

/// Spawn the poolboy: the single maintenance task that refreshes engine
/// health, destroys stale entries and keeps the rest alive.
pub fn spawn_poolboy(pool: Arc<AcePool>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tracing::info!("Poolboy started");
        let mut ticker = tokio::time::interval(POOLBOY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Poolboy stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            pool.check_ace_running().await;

            let entries: Vec<Arc<PoolEntry>> =
                pool.entries.read().await.values().cloned().collect();

            let mut stale: Vec<String> = Vec::new();
            for entry in &entries {
                if entry.is_stale() {
                    stale.push(entry.content_id.clone());
                } else {
                    entry.keep_alive(&pool.http).await;
                }
            }

            for content_id in stale {
                pool.remove_by_content_id(&content_id, "poolboy").await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(c: char) -> String {
        c.to_string().repeat(40)
    }

    fn test_pool(max_size: u32) -> AcePool {
        AcePool::new(
            Client::new(),
            "http://ace:6878/".to_string(),
            max_size,
            false,
            "http://gw.example".to_string(),
        )
    }

    async fn insert_entry(pool: &AcePool, pid: u32, content_id: &str) {
        let entry = Arc::new(PoolEntry::new(
            pid,
            "http://ace:6878/",
            content_id,
            None,
            false,
        ));
        pool.entries
            .write()
            .await
            .insert(content_id.to_string(), entry);
    }

    #[tokio::test]
    async fn test_available_pid_fills_gaps() {
        let pool = test_pool(4);
        insert_entry(&pool, 1, &cid('a')).await;
        insert_entry(&pool, 3, &cid('b')).await;
        assert_eq!(pool.available_pid().await, Some(2));
    }

    #[tokio::test]
    async fn test_pids_unique_and_in_range() {
        let pool = test_pool(4);
        for (pid, c) in [(1, 'a'), (2, 'b'), (3, 'c')] {
            insert_entry(&pool, pid, &cid(c)).await;
        }
        let entries = pool.entries.read().await;
        let mut pids: Vec<u32> = entries.values().map(|e| e.ace_pid).collect();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), entries.len());
        assert!(pids.iter().all(|&p| (1..=4).contains(&p)));
    }

    #[tokio::test]
    async fn test_full_pool_of_fresh_entries_evicts_oldest_used() {
        let pool = test_pool(2);
        insert_entry(&pool, 1, &cid('a')).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        insert_entry(&pool, 2, &cid('b')).await;

        // Fresh entries are not locked in, so the first (least recently
        // used) one is reclaimed
        let pid = pool.available_pid().await;
        assert_eq!(pid, Some(1));
        assert!(pool.get_by_content_id(&cid('a')).await.is_none());
        assert!(pool.get_by_content_id(&cid('b')).await.is_some());
    }

    #[tokio::test]
    async fn test_get_by_pid() {
        let pool = test_pool(4);
        insert_entry(&pool, 2, &cid('a')).await;
        assert!(pool.get_by_pid(2).await.is_some());
        assert!(pool.get_by_pid(1).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_content_id_rejected() {
        let pool = test_pool(4);
        assert_eq!(pool.get_hls_url("not-a-real-id").await, None);
    }
}
