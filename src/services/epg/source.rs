//! One configured XMLTV source
//!
//! Each source owns a file under the EPG data directory; the file's mtime
//! doubles as the last-updated time across restarts. Sources refresh every
//! six hours.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use reqwest::Client;
use url::Url;

use crate::config::{EpgFormat, EpgSourceConf};
use crate::util::ids::slugify;

pub const EPG_LIFESPAN: Duration = Duration::hours(6);

const DOWNLOAD_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug)]
pub struct EpgSource {
    pub url: String,
    pub format: EpgFormat,
    pub tvg_id_overrides: HashMap<String, String>,
    pub saved_file_path: PathBuf,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl EpgSource {
    pub fn new(conf: &EpgSourceConf, epg_data_dir: &std::path::Path) -> Self {
        let (host, path) = match Url::parse(&conf.url) {
            Ok(url) => (
                url.host_str().unwrap_or_default().to_string(),
                url.path().to_string(),
            ),
            Err(_) => (String::new(), conf.url.clone()),
        };
        let file_name = format!("{}-{}.xml", slugify(&host), slugify(&path));

        Self {
            url: conf.url.clone(),
            format: conf.format,
            tvg_id_overrides: conf.tvg_id_overrides.clone(),
            saved_file_path: epg_data_dir.join(file_name),
            last_updated: Mutex::new(None),
        }
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_updated(&self, when: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_updated.lock() {
            *guard = Some(when);
        }
    }

    /// Whether the source is due a refresh. An existing file's mtime seeds
    /// the last-updated time after a restart.
    pub fn time_to_update(&self) -> bool {
        if self.last_updated().is_none() {
            match std::fs::metadata(&self.saved_file_path)
                .and_then(|metadata| metadata.modified())
            {
                Ok(modified) => {
                    self.set_last_updated(DateTime::<Utc>::from(modified));
                }
                Err(_) => return true,
            }
        }

        match self.last_updated() {
            Some(last) => Utc::now() - last > EPG_LIFESPAN,
            None => true,
        }
    }

    pub fn time_since_last_update(&self) -> Duration {
        match self.last_updated() {
            Some(last) => Utc::now() - last,
            None => Duration::days(7),
        }
    }

    pub fn time_until_next_update(&self) -> Duration {
        match self.last_updated() {
            Some(last) => (EPG_LIFESPAN - (Utc::now() - last)).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    /// Download the source if due. Returns true when new data was written.
    pub async fn update(&self, http: &Client) -> bool {
        if !self.time_to_update() {
            return false;
        }

        let data = match self.download(http).await {
            Some(data) if !data.is_empty() => data,
            _ => {
                tracing::error!("Failed to download EPG data for {}", self.url);
                return false;
            }
        };

        tracing::info!("Writing EPG data to {}", self.saved_file_path.display());
        if let Err(e) = tokio::fs::write(&self.saved_file_path, &data).await {
            tracing::error!("Failed to write EPG file {}: {}", self.saved_file_path.display(), e);
            return false;
        }

        self.set_last_updated(Utc::now());
        tracing::info!("EPG data for {} updated successfully", self.url);
        true
    }

    /// Stored document bytes, removing empty files on sight.
    pub async fn data(&self) -> Option<Vec<u8>> {
        let data = tokio::fs::read(&self.saved_file_path).await.ok()?;
        if data.is_empty() {
            tracing::warn!("EPG file {} is empty, removing", self.saved_file_path.display());
            let _ = tokio::fs::remove_file(&self.saved_file_path).await;
            return None;
        }
        Some(data)
    }

    async fn download(&self, http: &Client) -> Option<Vec<u8>> {
        tracing::info!("Downloading EPG data from {}", self.url);

        let body = match http
            .get(&self.url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    tracing::error!("Failed to read EPG body for {}: {}", self.url, e);
                    return None;
                }
            },
            Err(e) => {
                tracing::error!("Failed to fetch EPG {}: {}", self.url, e);
                return None;
            }
        };

        match self.format {
            EpgFormat::Xml => Some(body),
            EpgFormat::XmlGz => {
                tracing::info!("Uncompressing gzipped EPG data");
                let mut decoder = GzDecoder::new(body.as_slice());
                let mut decompressed = Vec::new();
                match decoder.read_to_end(&mut decompressed) {
                    Ok(_) => Some(decompressed),
                    Err(e) => {
                        tracing::error!("Failed to decompress EPG {}: {}", self.url, e);
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn conf(url: &str, format: EpgFormat) -> EpgSourceConf {
        EpgSourceConf {
            url: url.to_string(),
            format,
            tvg_id_overrides: HashMap::new(),
        }
    }

    #[test]
    fn test_saved_file_path_derivation() {
        let tmp = tempfile::tempdir().unwrap();
        let source = EpgSource::new(
            &conf("https://guide.example.com/au/epg.xml.gz", EpgFormat::XmlGz),
            tmp.path(),
        );
        assert_eq!(
            source.saved_file_path,
            tmp.path().join("guide-example-com-au-epg-xml-gz.xml")
        );
    }

    #[test]
    fn test_time_to_update_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = EpgSource::new(&conf("https://e/epg.xml", EpgFormat::Xml), tmp.path());
        assert!(source.time_to_update());
        assert_eq!(source.time_until_next_update(), Duration::zero());
    }

    #[test]
    fn test_fresh_file_seeds_last_updated() {
        let tmp = tempfile::tempdir().unwrap();
        let source = EpgSource::new(&conf("https://e/epg.xml", EpgFormat::Xml), tmp.path());
        std::fs::write(&source.saved_file_path, b"<tv/>").unwrap();

        assert!(!source.time_to_update());
        assert!(source.last_updated().is_some());
        assert!(source.time_until_next_update() > Duration::zero());
    }

    #[tokio::test]
    async fn test_empty_file_removed_on_read() {
        let tmp = tempfile::tempdir().unwrap();
        let source = EpgSource::new(&conf("https://e/epg.xml", EpgFormat::Xml), tmp.path());
        std::fs::write(&source.saved_file_path, b"").unwrap();

        assert!(source.data().await.is_none());
        assert!(!source.saved_file_path.exists());
    }

    #[test]
    fn test_gz_roundtrip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<tv></tv>").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"<tv></tv>");
    }
}
