//! Per-stream quality tracking
//!
//! Every proxied playlist (or failed fetch) becomes an observation against
//! the stream's quality score. The in-memory cache is authoritative; scores
//! are flushed to the database at most once a minute per content id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::db::repository::quality as quality_repo;
use crate::util::ids::{ace_id_short, is_valid_ace_id};
use crate::AppState;

const QUALITY_ON_FIRST_SUCCESS: i64 = 20;
const MIN_QUALITY: i64 = 0;
const MAX_QUALITY: i64 = 99;
const LATE_SEGMENT_PUNISHMENT: i64 = -4;
/// Below this segment number the stream is considered freshly started and
/// judged more leniently.
const NEW_STREAM_THRESHOLD: i64 = 20;
const DEFAULT_NEXT_SEGMENT_EXPECTED_SECS: i64 = 30;
const TIME_BETWEEN_DB_WRITES_SECS: i64 = 60;

lazy_static! {
    static ref EXTINF_SECONDS: Regex = Regex::new(r"EXTINF:(\d+(\.\d+)?),").unwrap();
    static ref TS_NUMBER: Regex = Regex::new(r"(\d+)\.ts.*$").unwrap();
}

/// Quality state for one stream.
#[derive(Debug, Clone)]
pub struct Quality {
    /// -1 until the stream has ever been evaluated.
    pub score: i64,
    pub has_ever_worked: bool,
    pub m3u_failures: i64,
    pub last_message: String,
    last_segment_number: i64,
    last_segment_fetched: DateTime<Utc>,
    next_segment_expected: Duration,
    last_db_write: DateTime<Utc>,
}

impl Default for Quality {
    fn default() -> Self {
        Self {
            score: -1,
            has_ever_worked: false,
            m3u_failures: 0,
            last_message: String::new(),
            last_segment_number: 0,
            last_segment_fetched: Utc::now(),
            next_segment_expected: Duration::seconds(DEFAULT_NEXT_SEGMENT_EXPECTED_SECS),
            last_db_write: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl Quality {
    fn from_persisted(score: i64, has_ever_worked: bool, m3u_failures: i64) -> Self {
        Self {
            score,
            has_ever_worked,
            m3u_failures,
            ..Self::default()
        }
    }

    /// Apply one observation. An empty playlist means the fetch failed.
    pub fn update(&mut self, playlist: &str) {
        let mut rating: i64;
        self.last_message.clear();

        if playlist.is_empty() {
            // Always the case while the engine is still spinning a stream up
            rating = (-self.m3u_failures).max(-5);
            self.m3u_failures += 1;
        } else {
            self.m3u_failures = 0;

            let lines: Vec<&str> = playlist.lines().collect();
            let last_line = match lines.last() {
                Some(line) => *line,
                None => return,
            };

            let ts_number = TS_NUMBER
                .captures(last_line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<i64>().ok());
            let ts_number = match ts_number {
                Some(n) => n,
                None => {
                    tracing::warn!("Could not extract TS number from last line: {}", last_line);
                    return;
                }
            };

            let now = Utc::now();
            let time_since_last_segment = now - self.last_segment_fetched;
            let segment_is_late = time_since_last_segment > self.next_segment_expected;

            if ts_number > self.last_segment_number {
                let n_new_segments = ts_number - self.last_segment_number;
                rating = n_new_segments.clamp(1, 5);
                self.last_segment_fetched = now;
                self.last_message = format!(
                    "Score +{rating} ({n_new_segments} new segment{})",
                    if n_new_segments > 1 { "s" } else { "" }
                );
            } else if segment_is_late {
                // We can't know when the pending segment became available, so
                // this is as fair a comparison as we get
                rating = if ts_number < NEW_STREAM_THRESHOLD {
                    -1
                } else {
                    LATE_SEGMENT_PUNISHMENT
                };
                let overdue = time_since_last_segment - self.next_segment_expected;
                self.last_message =
                    format!("Score {rating} (Expected segment {}s ago)", overdue.num_seconds());
            } else {
                self.last_message = "Score +0 (no new segment due)".to_string();
                rating = 0;
            }

            self.last_segment_number = ts_number;

            if lines.len() >= 2 {
                if let Some(caps) = EXTINF_SECONDS.captures(lines[lines.len() - 2]) {
                    if let Ok(seconds) = caps[1].parse::<f64>() {
                        self.next_segment_expected =
                            Duration::milliseconds((seconds * 1000.0) as i64);
                    }
                }
            }
        }

        if rating > 0 {
            self.score = self.score.max(QUALITY_ON_FIRST_SUCCESS);
            self.has_ever_worked = true;
        }

        self.score = (self.score + rating).clamp(MIN_QUALITY, MAX_QUALITY);
    }

    /// True at most once per minute; flips the write clock as a side effect.
    fn time_to_write_to_db(&mut self) -> bool {
        let now = Utc::now();
        if now - self.last_db_write >= Duration::seconds(TIME_BETWEEN_DB_WRITES_SECS) {
            self.last_db_write = now;
            return true;
        }
        false
    }
}

/// Tracker service shared by the proxy and the background recheck.
#[derive(Clone)]
pub struct QualityTracker {
    pool: SqlitePool,
    cache: Arc<Mutex<HashMap<String, Quality>>>,
    checking: Arc<AtomicBool>,
}

impl QualityTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(Mutex::new(HashMap::new())),
            checking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Feed one observation for a content id. Master playlists are not
    /// evidence of segment progress and are skipped.
    pub async fn observe(&self, content_id: &str, playlist: &str) {
        if !is_valid_ace_id(content_id) {
            return;
        }

        if playlist.contains("#EXT-X-STREAM-INF") {
            tracing::debug!(
                "Skipping quality update for {}, multistream detected",
                ace_id_short(content_id)
            );
            return;
        }

        let mut cache = self.cache.lock().await;
        if !cache.contains_key(content_id) {
            let loaded = self.load(content_id).await;
            cache.insert(content_id.to_string(), loaded);
        }
        let Some(entry) = cache.get_mut(content_id) else {
            return;
        };

        entry.update(playlist);
        tracing::debug!(
            "Stream quality {}: {} [{}]",
            ace_id_short(content_id),
            entry.score,
            entry.last_message
        );

        if entry.time_to_write_to_db() {
            let (score, worked, failures) =
                (entry.score, entry.has_ever_worked, entry.m3u_failures);
            drop(cache);
            if let Err(e) =
                quality_repo::upsert(&self.pool, content_id, score, worked, failures).await
            {
                tracing::error!("Failed to persist quality for {}: {}", ace_id_short(content_id), e);
            }
        }
    }

    /// Current quality for a content id; absence means "never evaluated".
    pub async fn get(&self, content_id: &str) -> Quality {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(content_id) {
            return entry.clone();
        }
        let loaded = self.load(content_id).await;
        cache.insert(content_id.to_string(), loaded.clone());
        loaded
    }

    pub fn recheck_running(&self) -> bool {
        self.checking.load(Ordering::SeqCst)
    }

    async fn load(&self, content_id: &str) -> Quality {
        match quality_repo::get(&self.pool, content_id).await {
            Ok(Some(row)) => {
                Quality::from_persisted(row.score, row.has_ever_worked, row.m3u_failures)
            }
            Ok(None) => Quality::default(),
            Err(e) => {
                tracing::error!("Failed to load quality for {}: {}", ace_id_short(content_id), e);
                Quality::default()
            }
        }
    }
}

/// Kick off a background sweep over every catalog entry that has never
/// worked or currently scores zero. Single-flight: returns false when a
/// sweep is already running.
pub fn spawn_recheck(state: Arc<AppState>, attempt_delay_secs: u64, stream_delay_secs: u64) -> bool {
    let checking = Arc::clone(&state.quality.checking);
    if checking
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }

    tokio::spawn(async move {
        let result = run_recheck_sweep(&state, attempt_delay_secs, stream_delay_secs).await;
        if let Err(e) = result {
            tracing::error!("Quality recheck sweep failed: {}", e);
        }
        state.quality.checking.store(false, Ordering::SeqCst);
    });

    true
}

async fn run_recheck_sweep(
    state: &Arc<AppState>,
    attempt_delay_secs: u64,
    stream_delay_secs: u64,
) -> anyhow::Result<()> {
    let streams = state.catalog.streams_all().await?;
    if streams.is_empty() {
        tracing::warn!("No streams found to check quality");
        return Ok(());
    }

    let mut to_check = Vec::new();
    for stream in streams {
        let quality = state.quality.get(&stream.content_id).await;
        if !quality.has_ever_worked || quality.score == 0 {
            to_check.push(stream);
        }
    }

    let total = to_check.len();
    for (n, stream) in to_check.into_iter().enumerate() {
        if state.shutdown.is_cancelled() {
            tracing::info!("Quality recheck cancelled");
            return Ok(());
        }

        tracing::info!(
            "Checking stream {} {} ({}/{})",
            ace_id_short(&stream.content_id),
            stream.title,
            n + 1,
            total
        );

        for _ in 0..3 {
            // Token auth is bypassed on purpose: this is the gateway probing
            // itself, not a client request
            let _ = crate::services::hls_proxy::proxy_playlist(state, &stream.content_id, "").await;

            tokio::select! {
                _ = state.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(std::time::Duration::from_secs(attempt_delay_secs)) => {}
            }
        }

        tokio::select! {
            _ = state.shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(std::time::Duration::from_secs(stream_delay_secs)) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(segments: &[(u32, f64)]) -> String {
        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for (number, duration) in segments {
            out.push_str(&format!("#EXTINF:{duration},\n{number}.ts\n"));
        }
        out.trim_end().to_string()
    }

    #[test]
    fn test_failure_ratings_ramp_down() {
        let mut quality = Quality::default();
        quality.update("");
        // First failure rates 0, score clamps from -1 to 0
        assert_eq!(quality.score, 0);
        assert_eq!(quality.m3u_failures, 1);

        quality.update("");
        assert_eq!(quality.score, 0);
        assert_eq!(quality.m3u_failures, 2);
        assert!(!quality.has_ever_worked);
    }

    #[test]
    fn test_first_success_floor() {
        let mut quality = Quality::default();
        quality.update(&playlist(&[(1, 6.0), (2, 6.0)]));
        // Progress from 0 to 2 rates +2 on top of the first-success floor
        assert_eq!(quality.score, 22);
        assert!(quality.has_ever_worked);
    }

    #[test]
    fn test_progress_rating_clamped_to_five() {
        let mut quality = Quality::default();
        quality.update(&playlist(&[(1, 6.0)]));
        quality.update(&playlist(&[(100, 6.0)]));
        // 99 new segments still only rates +5
        assert_eq!(quality.score, 21 + 5);
    }

    #[test]
    fn test_no_new_segment_not_late_rates_zero() {
        let mut quality = Quality::default();
        quality.update(&playlist(&[(5, 30.0)]));
        let before = quality.score;
        quality.update(&playlist(&[(5, 30.0)]));
        assert_eq!(quality.score, before);
    }

    #[test]
    fn test_score_bounds_hold() {
        let mut quality = Quality::default();
        for n in 1..200 {
            quality.update(&playlist(&[(n, 6.0)]));
            assert!(quality.score >= 0 && quality.score <= 99);
        }
        assert_eq!(quality.score, 99);

        for _ in 0..100 {
            quality.update("");
            assert!(quality.score >= 0 && quality.score <= 99);
        }
        assert_eq!(quality.score, 0);
        // has_ever_worked is monotone
        assert!(quality.has_ever_worked);
    }

    #[test]
    fn test_master_playlist_not_an_observation() {
        // Checked at the tracker level; the raw update would misread it
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000000\nvariant/1.m3u8";
        assert!(master.contains("#EXT-X-STREAM-INF"));
    }

    #[test]
    fn test_next_segment_expected_parsed() {
        let mut quality = Quality::default();
        quality.update(&playlist(&[(1, 2.5)]));
        assert_eq!(quality.next_segment_expected, Duration::milliseconds(2500));
    }
}
