//! Application configuration
//!
//! The durable configuration lives in `<instance>/config.json` as plain
//! records; a handful of process-level settings (port, instance dir, admin
//! key) come from environment variables only. Every mutation writes a
//! timestamped backup of the previous file before replacing it.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::paths::InstancePaths;
use crate::util::hls::ensure_trailing_slash;
use crate::util::ids::slugify;

/// Process-level settings loaded from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct ServerEnv {
    pub port: u16,
    pub instance_dir: PathBuf,
    pub admin_key: String,
    pub external_url_override: Option<String>,
}

impl ServerEnv {
    /// Load server settings from `ACE_GATEWAY_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            port: env::var("ACE_GATEWAY_PORT")
                .unwrap_or_else(|_| "5100".to_string())
                .parse()
                .unwrap_or(5100),
            instance_dir: env::var("ACE_GATEWAY_INSTANCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("instance")),
            admin_key: env::var("ACE_GATEWAY_ADMIN_KEY").unwrap_or_default(),
            external_url_override: env::var("ACE_GATEWAY_EXTERNAL_URL").ok(),
        }
    }
}

// ============================================================================
// Config sections
// ============================================================================

const MIN_STREAMS: u32 = 1;
const DEFAULT_STREAMS: u32 = 4;
const HIGH_STREAMS: u32 = 10;
const VERY_HIGH_STREAMS: u32 = 20;

/// Engine-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConf {
    pub ace_address: String,
    pub transcode_audio: bool,
    pub ace_max_streams: u32,
    /// Whether a multistream-path probe refreshes a pool entry's last-used
    /// timestamp.
    pub touch_on_multistream_probe: bool,
}

impl Default for AppConf {
    fn default() -> Self {
        Self {
            ace_address: "http://localhost:6878/".to_string(),
            transcode_audio: true,
            ace_max_streams: DEFAULT_STREAMS,
            touch_on_multistream_probe: true,
        }
    }
}

/// Title allow/deny filtering, evaluated strictly in field order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleFilter {
    pub always_exclude_words: Vec<String>,
    pub always_include_words: Vec<String>,
    pub exclude_words: Vec<String>,
    pub include_words: Vec<String>,
    pub regex_postprocessing: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlFilter {
    /// HTML class a candidate title element must carry; empty matches
    /// elements with no class attribute.
    pub target_class: String,
    pub check_sibling: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlSource {
    pub name: String,
    pub url: String,
    pub title_filter: TitleFilter,
    pub html_filter: HtmlFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IptvSource {
    pub name: String,
    pub url: String,
    pub title_filter: TitleFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSource {
    pub name: String,
    pub url: String,
    pub title_filter: TitleFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConf {
    pub html: Vec<HtmlSource>,
    pub iptv_m3u8: Vec<IptvSource>,
    pub api: Vec<ApiSource>,
    pub content_id_name_overrides: HashMap<String, String>,
    pub category_mapping: HashMap<String, Vec<String>>,
    pub tvg_logo_external_url: Option<String>,
}

impl Default for ScraperConf {
    fn default() -> Self {
        Self {
            html: Vec::new(),
            iptv_m3u8: Vec::new(),
            api: Vec::new(),
            content_id_name_overrides: HashMap::new(),
            category_mapping: default_category_mapping(),
            tvg_logo_external_url: None,
        }
    }
}

fn default_category_mapping() -> HashMap<String, Vec<String>> {
    let mut mapping = HashMap::new();
    mapping.insert(
        "sports".to_string(),
        [
            "football", "soccer", "basketball", "nba", "sport", "tennis", "moto", "f1", "hockey",
            "cricket", "rugby", "golf",
        ]
        .map(String::from)
        .to_vec(),
    );
    mapping.insert(
        "movies".to_string(),
        ["movie", "cinema", "film"].map(String::from).to_vec(),
    );
    mapping.insert("news".to_string(), vec!["news".to_string()]);
    mapping.insert(
        "kids".to_string(),
        ["kids", "children"].map(String::from).to_vec(),
    );
    mapping.insert(
        "music".to_string(),
        ["music", "concert", "radio"].map(String::from).to_vec(),
    );
    mapping
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpgFormat {
    #[serde(rename = "xml")]
    Xml,
    #[serde(rename = "xml.gz")]
    XmlGz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpgSourceConf {
    pub url: String,
    pub format: EpgFormat,
    pub tvg_id_overrides: HashMap<String, String>,
}

impl Default for EpgSourceConf {
    fn default() -> Self {
        Self {
            url: String::new(),
            format: EpgFormat::XmlGz,
            tvg_id_overrides: HashMap::new(),
        }
    }
}

/// The sections the remote-settings fetcher is allowed to replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigExport {
    pub scraper: ScraperConf,
    pub epgs: Vec<EpgSourceConf>,
}

// ============================================================================
// Root config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppConf,
    pub scraper: ScraperConf,
    pub epgs: Vec<EpgSourceConf>,
    pub remote_settings_url: Option<String>,
    pub external_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppConf::default(),
            scraper: ScraperConf::default(),
            epgs: Vec::new(),
            remote_settings_url: None,
            external_url: "http://localhost:5100".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the config file, falling back to defaults when it doesn't exist.
    /// Field coercions run after load; a failed validation keeps the process
    /// from starting with a broken config.
    pub fn load(paths: &InstancePaths, server_env: &ServerEnv) -> anyhow::Result<Self> {
        let config_path = paths.config_file();

        let mut config: AppConfig = if config_path.is_file() {
            let raw = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&raw)?
        } else {
            tracing::warn!(
                "Config file {} does not exist, loading defaults",
                config_path.display()
            );
            AppConfig::default()
        };

        if let Some(ref external) = server_env.external_url_override {
            config.external_url = external.clone();
        }

        config.normalise();
        if let Err(errors) = config.validate() {
            anyhow::bail!("Invalid configuration: {}", errors.join("; "));
        }

        Ok(config)
    }

    /// Apply field-level coercions: URL slash normalisation, slug-derived
    /// source names, stream count clamping.
    pub fn normalise(&mut self) {
        self.app.ace_address = ensure_trailing_slash(&self.app.ace_address);
        self.external_url = self.external_url.trim_end_matches('/').to_string();

        if let Some(ref logo_url) = self.scraper.tvg_logo_external_url {
            self.scraper.tvg_logo_external_url =
                Some(logo_url.trim_end_matches('/').to_string());
        }

        if self.app.ace_max_streams < MIN_STREAMS {
            tracing::warn!(
                "ace_max_streams {} is below the minimum of {}, using default of {}",
                self.app.ace_max_streams,
                MIN_STREAMS,
                DEFAULT_STREAMS
            );
            self.app.ace_max_streams = DEFAULT_STREAMS;
        } else if self.app.ace_max_streams > VERY_HIGH_STREAMS {
            tracing::warn!(
                "ace_max_streams is set VERY high ({}), expect performance issues",
                self.app.ace_max_streams
            );
        } else if self.app.ace_max_streams > HIGH_STREAMS {
            tracing::warn!(
                "ace_max_streams is set high ({}), this may cause performance issues",
                self.app.ace_max_streams
            );
        }

        for source in &mut self.scraper.html {
            source.name = derive_source_name(&source.name, &source.url);
        }
        for source in &mut self.scraper.iptv_m3u8 {
            source.name = derive_source_name(&source.name, &source.url);
        }
        for source in &mut self.scraper.api {
            source.name = derive_source_name(&source.name, &source.url);
            source.url = source.url.trim_end_matches('/').to_string();
        }
    }

    /// Validate the config, returning one message per problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let mut seen_names: Vec<&str> = Vec::new();
        let all_names = self
            .scraper
            .html
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.scraper.iptv_m3u8.iter().map(|s| s.name.as_str()))
            .chain(self.scraper.api.iter().map(|s| s.name.as_str()));
        for name in all_names {
            if seen_names.contains(&name) {
                errors.push(format!("Duplicate scraper source name: '{name}'"));
            }
            seen_names.push(name);
        }

        if url::Url::parse(&self.app.ace_address).is_err() {
            errors.push(format!("Invalid ace_address: '{}'", self.app.ace_address));
        }
        if url::Url::parse(&self.external_url).is_err() {
            errors.push(format!("Invalid external_url: '{}'", self.external_url));
        }
        for epg in &self.epgs {
            if url::Url::parse(&epg.url).is_err() {
                errors.push(format!("Invalid EPG url: '{}'", epg.url));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Persist the config, backing up the previous file first.
    pub fn save(&self, paths: &InstancePaths) -> anyhow::Result<()> {
        let config_path = paths.config_file();

        if config_path.is_file() {
            let backup_dir = paths.config_backups_dir();
            std::fs::create_dir_all(&backup_dir)?;
            let stamp = Utc::now().format("%Y-%m-%d_%H%M%S%.3f");
            let backup_path = backup_dir.join(format!("config_{stamp}.json.bak"));
            tracing::info!("Backing up previous config to {}", backup_path.display());
            std::fs::copy(&config_path, &backup_path)?;
        }

        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, serialized)?;
        tracing::info!("Config written to {}", config_path.display());

        Ok(())
    }

    pub fn export(&self) -> ConfigExport {
        ConfigExport {
            scraper: self.scraper.clone(),
            epgs: self.epgs.clone(),
        }
    }
}

/// Sources with no explicit name get one derived from their URL.
fn derive_source_name(name: &str, url: &str) -> String {
    if name.is_empty() {
        let decoded = urlencoding::decode(url)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| url.to_string());
        slugify(&decoded)
    } else {
        slugify(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = AppConfig::default();
        config.normalise();
        assert!(config.validate().is_ok());
        assert_eq!(config.app.ace_max_streams, 4);
        assert!(config.app.ace_address.ends_with('/'));
    }

    #[test]
    fn test_source_name_derivation() {
        let mut config = AppConfig::default();
        config.scraper.iptv_m3u8.push(IptvSource {
            url: "https://example.com/lists/playlist.m3u8".to_string(),
            ..Default::default()
        });
        config.normalise();
        assert_eq!(
            config.scraper.iptv_m3u8[0].name,
            "https-example-com-lists-playlist-m3u8"
        );
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let mut config = AppConfig::default();
        for _ in 0..2 {
            config.scraper.iptv_m3u8.push(IptvSource {
                name: "same".to_string(),
                url: "https://example.com/a.m3u8".to_string(),
                ..Default::default()
            });
        }
        config.normalise();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Duplicate")));
    }

    #[test]
    fn test_max_streams_clamped() {
        let mut config = AppConfig::default();
        config.app.ace_max_streams = 0;
        config.normalise();
        assert_eq!(config.app.ace_max_streams, 4);
    }

    #[test]
    fn test_save_writes_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = InstancePaths::new(tmp.path());
        paths.ensure_dirs().unwrap();

        let config = AppConfig::default();
        config.save(&paths).unwrap();
        config.save(&paths).unwrap();

        let backups: Vec<_> = std::fs::read_dir(paths.config_backups_dir())
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_epg_format_serde() {
        let conf: EpgSourceConf =
            serde_json::from_str(r#"{"url": "http://e/epg.xml.gz", "format": "xml.gz"}"#).unwrap();
        assert_eq!(conf.format, EpgFormat::XmlGz);
        let text = serde_json::to_string(&conf).unwrap();
        assert!(text.contains("xml.gz"));
    }
}
