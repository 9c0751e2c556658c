//! EPG merger
//!
//! Downloads every configured XMLTV source on its own cadence, scores
//! per-tvg-id candidates across sources and publishes one condensed XMLTV
//! document. The condensed bytes are immutable once published; readers get
//! an `Arc` swap.

pub mod candidate;
pub mod source;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::EpgSourceConf;
use crate::metrics;
use crate::util::ids::slugify;

use candidate::CandidateStore;
use source::{EpgSource, EPG_LIFESPAN};

/// Lower bound on the update loop's sleep, used while any source has never
/// been fetched.
const EPG_CHECK_INTERVAL_MINIMUM: Duration = Duration::minutes(1);

/// Grace period between a successful download and recondensation.
const RECONDENSE_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct EpgSourceHealth {
    pub url: String,
    pub time_since_last_update_secs: i64,
    pub time_until_next_update_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpgHealthView {
    pub time_until_next_update_secs: i64,
    pub tvg_ids: Vec<String>,
    pub epgs: HashMap<String, EpgSourceHealth>,
}

pub struct EpgHandler {
    http: Client,
    epg_data_dir: PathBuf,
    generator_name: String,
    sources: RwLock<Vec<Arc<EpgSource>>>,
    /// tvg-ids the catalog wants guide data for.
    tvg_ids: Mutex<HashSet<String>>,
    condensed: StdRwLock<Arc<Vec<u8>>>,
    /// tvg-id -> winning source URL (None when no candidate was found).
    mappings: StdMutex<HashMap<String, Option<String>>>,
    next_update_time: StdMutex<DateTime<Utc>>,
    refresh: Notify,
}

impl EpgHandler {
    pub fn new(http: Client, epg_data_dir: PathBuf) -> Self {
        Self {
            http,
            epg_data_dir,
            generator_name: format!("ace-gateway/{}", env!("CARGO_PKG_VERSION")),
            sources: RwLock::new(Vec::new()),
            tvg_ids: Mutex::new(HashSet::new()),
            condensed: StdRwLock::new(Arc::new(Vec::new())),
            mappings: StdMutex::new(HashMap::new()),
            next_update_time: StdMutex::new(Utc::now()),
            refresh: Notify::new(),
        }
    }

    /// Replace the source list (config change) and wake the update loop.
    pub async fn set_sources(&self, confs: &[EpgSourceConf]) {
        let sources: Vec<Arc<EpgSource>> = confs
            .iter()
            .filter(|conf| !conf.url.is_empty())
            .map(|conf| Arc::new(EpgSource::new(conf, &self.epg_data_dir)))
            .collect();

        tracing::info!("EPG merger configured with {} sources", sources.len());
        *self.sources.write().await = sources;
        self.refresh.notify_one();
    }

    /// Add tvg-ids of interest (from the scraper) and recondense so the
    /// guide is never empty right after startup.
    pub async fn add_tvg_ids(&self, tvg_ids: &[String]) {
        {
            let mut wanted = self.tvg_ids.lock().await;
            for tvg_id in tvg_ids {
                if !tvg_id.is_empty() {
                    wanted.insert(tvg_id.clone());
                }
            }
        }

        self.condense().await;
    }

    /// The published condensed guide.
    pub fn condensed_bytes(&self) -> Arc<Vec<u8>> {
        self.condensed
            .read()
            .map(|guard| Arc::clone(&*guard))
            .unwrap_or_default()
    }

    pub fn tvg_epg_mappings(&self) -> HashMap<String, Option<String>> {
        self.mappings
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub async fn health_view(&self) -> EpgHealthView {
        let sources = self.sources.read().await.clone();
        let epgs = sources
            .iter()
            .map(|source| {
                let key = slugify(
                    &urlencoding::decode(&source.url)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| source.url.clone()),
                );
                (
                    key,
                    EpgSourceHealth {
                        url: source.url.clone(),
                        time_since_last_update_secs: source.time_since_last_update().num_seconds(),
                        time_until_next_update_secs: source.time_until_next_update().num_seconds(),
                    },
                )
            })
            .collect();

        let mut tvg_ids: Vec<String> = self.tvg_ids.lock().await.iter().cloned().collect();
        tvg_ids.sort();

        let next_update = self
            .next_update_time
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now());

        EpgHealthView {
            time_until_next_update_secs: (next_update - Utc::now()).num_seconds().max(0),
            tvg_ids,
            epgs,
        }
    }

    /// Download every due source concurrently; one failure never blocks the
    /// others. Returns true when any source got new data.
    async fn update_all(&self) -> bool {
        let sources = self.sources.read().await.clone();
        let updates = sources.iter().map(|source| {
            let source = Arc::clone(source);
            let http = self.http.clone();
            async move { source.update(&http).await }
        });

        let results = futures::future::join_all(updates).await;
        results.into_iter().any(|updated| updated)
    }

    /// Rebuild the condensed document from the stored source files.
    pub async fn condense(&self) {
        let wanted: HashSet<String> = self.tvg_ids.lock().await.iter().cloned().collect();
        if wanted.is_empty() {
            tracing::warn!("No TVG IDs known yet, skipping EPG condensation");
            return;
        }

        let sources = self.sources.read().await.clone();
        let mut store = CandidateStore::default();

        for source in &sources {
            let Some(data) = source.data().await else {
                continue;
            };
            if let Err(e) = candidate::collect_candidates(
                &data,
                &source.url,
                &wanted,
                &source.tvg_id_overrides,
                &mut store,
            ) {
                tracing::error!("Failed to parse EPG XML data for {}: {}", source.url, e);
            }
        }

        if store.is_empty() {
            tracing::warn!("No EPG candidates found, skipping EPG condensation");
            return;
        }

        let now = Utc::now();
        let mut ordered_ids: Vec<&String> = wanted.iter().collect();
        ordered_ids.sort();

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        out.extend_from_slice(
            format!("<tv generator-info-name=\"{}\">\n", self.generator_name).as_bytes(),
        );

        let mut channels = 0usize;
        let mut programmes = 0usize;
        let mut new_mappings: HashMap<String, Option<String>> = HashMap::new();

        for tvg_id in ordered_ids {
            match store.best_candidate(tvg_id, now) {
                Some(best) => {
                    new_mappings.insert(tvg_id.clone(), Some(best.epg_url.clone()));
                    for channel in &best.channels {
                        out.extend_from_slice(channel);
                        out.push(b'\n');
                        channels += 1;
                    }
                    for programme in &best.programmes {
                        out.extend_from_slice(&programme.xml);
                        out.push(b'\n');
                        programmes += 1;
                    }
                }
                None => {
                    tracing::debug!("No EPG candidate found for TVG ID {}", tvg_id);
                    new_mappings.insert(tvg_id.clone(), None);
                }
            }
        }

        out.extend_from_slice(b"</tv>\n");

        tracing::info!(
            "Condensed EPG created with {} channels and {} programmes",
            channels,
            programmes
        );

        if let Ok(mut guard) = self.condensed.write() {
            *guard = Arc::new(out);
        }
        if let Ok(mut guard) = self.mappings.lock() {
            *guard = new_mappings;
        }
        metrics::EPG_CONDENSATIONS.inc();
    }

    /// How long to sleep until the next wake: the soonest per-source refresh
    /// plus a safety margin, clamped between one minute and the full lifespan.
    async fn time_to_next_update(&self) -> Duration {
        let sources = self.sources.read().await;
        let mut wait = EPG_LIFESPAN;

        for source in sources.iter() {
            if source.last_updated().is_none() {
                return EPG_CHECK_INTERVAL_MINIMUM;
            }
            wait = wait.min(source.time_until_next_update());
        }

        (wait + EPG_CHECK_INTERVAL_MINIMUM).min(EPG_LIFESPAN).max(EPG_CHECK_INTERVAL_MINIMUM)
    }
}

/// Spawn the EPG update loop.
pub fn spawn_epg_updater(epg: Arc<EpgHandler>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tracing::info!("EPG merger started");
        loop {
            let updated = epg.update_all().await;

            if updated {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONDENSE_DELAY) => {}
                }
                tracing::info!("EPG sources updated, condensing now");
                epg.condense().await;
            }

            let wait = epg.time_to_next_update().await;
            if let Ok(mut guard) = epg.next_update_time.lock() {
                *guard = Utc::now() + wait;
            }
            tracing::info!("Next EPG update in {}s", wait.num_seconds());

            let sleep = wait.to_std().unwrap_or(std::time::Duration::from_secs(60));
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("EPG merger stopping");
                    break;
                }
                _ = epg.refresh.notified() => {
                    tracing::info!("EPG source list changed, updating now");
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EpgFormat;

    fn handler(tmp: &tempfile::TempDir) -> EpgHandler {
        EpgHandler::new(Client::new(), tmp.path().to_path_buf())
    }

    fn write_source(handler_dir: &std::path::Path, url: &str, xml: &str) -> EpgSourceConf {
        let conf = EpgSourceConf {
            url: url.to_string(),
            format: EpgFormat::Xml,
            tvg_id_overrides: HashMap::new(),
        };
        let source = EpgSource::new(&conf, handler_dir);
        std::fs::write(&source.saved_file_path, xml).unwrap();
        conf
    }

    #[tokio::test]
    async fn test_condense_produces_selected_elements() {
        let tmp = tempfile::tempdir().unwrap();
        let epg = handler(&tmp);

        let xml = r#"<tv>
<channel id="Chan.au"><display-name>Chan</display-name></channel>
<programme channel="Chan.au" start="20300101120000 +0000" stop="20300101130000 +0000"><title>Show</title></programme>
<channel id="Unwanted.us"><display-name>Nope</display-name></channel>
<programme channel="Unwanted.us" start="20300101120000 +0000"><title>Nope</title></programme>
</tv>"#;
        let conf = write_source(tmp.path(), "https://guide.example/epg.xml", xml);
        epg.set_sources(&[conf]).await;

        epg.add_tvg_ids(&["Chan.au".to_string()]).await;

        let condensed = String::from_utf8(epg.condensed_bytes().to_vec()).unwrap();
        assert!(condensed.contains("generator-info-name"));
        assert!(condensed.contains(r#"channel="Chan.au""#));
        assert!(!condensed.contains("Unwanted"));
        // Programme count equals the selected candidate's programme count
        assert_eq!(condensed.matches("<programme").count(), 1);

        let mappings = epg.tvg_epg_mappings();
        assert_eq!(
            mappings.get("Chan.au"),
            Some(&Some("https://guide.example/epg.xml".to_string()))
        );
    }

    #[tokio::test]
    async fn test_condense_without_tvg_ids_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let epg = handler(&tmp);
        epg.condense().await;
        assert!(epg.condensed_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_best_source_wins_per_tvg_id() {
        let tmp = tempfile::tempdir().unwrap();
        let epg = handler(&tmp);

        // Rich source has six upcoming described programmes, poor has one
        let mut rich = String::from("<tv><channel id=\"Chan.au\"><display-name>C</display-name></channel>\n");
        for hour in 10..16 {
            rich.push_str(&format!(
                "<programme channel=\"Chan.au\" start=\"20300101{hour}0000 +0000\"><title>S</title><desc>A long enough description here</desc></programme>\n"
            ));
        }
        rich.push_str("</tv>");

        let poor = r#"<tv>
<channel id="Chan.au"><display-name>C</display-name></channel>
<programme channel="Chan.au" start="20300101120000 +0000"><title>S</title></programme>
</tv>"#;

        let conf_poor = write_source(tmp.path(), "https://poor.example/epg.xml", poor);
        let conf_rich = write_source(tmp.path(), "https://rich.example/epg.xml", &rich);
        epg.set_sources(&[conf_poor, conf_rich]).await;
        epg.add_tvg_ids(&["Chan.au".to_string()]).await;

        let mappings = epg.tvg_epg_mappings();
        assert_eq!(
            mappings.get("Chan.au"),
            Some(&Some("https://rich.example/epg.xml".to_string()))
        );
        // Winner's six programmes, loser contributes nothing
        let condensed = String::from_utf8(epg.condensed_bytes().to_vec()).unwrap();
        assert_eq!(condensed.matches("<programme").count(), 6);
    }
}
