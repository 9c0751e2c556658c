//! Instance directory layout
//!
//! Everything the gateway persists lives under a single instance directory:
//! config, database, scrape cache, logos, EPG files and playlists.

use std::path::{Path, PathBuf};

/// Resolved on-disk locations for one gateway instance.
#[derive(Debug, Clone)]
pub struct InstancePaths {
    instance_dir: PathBuf,
}

impl InstancePaths {
    pub fn new(instance_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance_dir: instance_dir.into(),
        }
    }

    /// Create all instance directories. Creation is idempotent.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.instance_dir.clone(),
            self.scraper_cache_dir(),
            self.tvg_logos_dir(),
            self.playlists_dir(),
            self.epg_data_dir(),
            self.config_backups_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.instance_dir.join("config.json")
    }

    pub fn config_backups_dir(&self) -> PathBuf {
        self.instance_dir.join("config_backups")
    }

    pub fn database_file(&self) -> PathBuf {
        self.instance_dir.join("acerestreamer.db")
    }

    pub fn scraper_cache_dir(&self) -> PathBuf {
        self.instance_dir.join("scraper_cache")
    }

    pub fn tvg_logos_dir(&self) -> PathBuf {
        self.instance_dir.join("tvg_logos")
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.instance_dir.join("playlists")
    }

    pub fn epg_data_dir(&self) -> PathBuf {
        self.instance_dir.join("epg_data")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.instance_dir.join("gateway.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = InstancePaths::new("/tmp/instance");
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/instance/acerestreamer.db"));
        assert_eq!(
            paths.scraper_cache_dir(),
            PathBuf::from("/tmp/instance/scraper_cache")
        );
        assert_eq!(paths.epg_data_dir(), PathBuf::from("/tmp/instance/epg_data"));
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = InstancePaths::new(tmp.path().join("inst"));
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.tvg_logos_dir().is_dir());
        assert!(paths.config_backups_dir().is_dir());
    }
}
