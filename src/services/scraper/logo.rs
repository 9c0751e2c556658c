//! Best-effort channel logo fetching
//!
//! Logos are stored as `<slug(title)>.<ext>` under the instance logo
//! directory. An existing file always wins; otherwise the configured mirror
//! is tried per extension, then whatever `tvg-logo=` URL the source line
//! carried. Failures never fail a scrape.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;

use crate::util::ids::slugify;

pub const SUPPORTED_TVG_LOGO_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

const LOGO_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of an already-downloaded logo for a title, if any.
pub fn find_logo_file(logos_dir: &Path, title: &str) -> Option<String> {
    let slug = slugify(title);
    for extension in SUPPORTED_TVG_LOGO_EXTENSIONS {
        let file_name = format!("{slug}.{extension}");
        if logos_dir.join(&file_name).is_file() {
            return Some(file_name);
        }
    }
    None
}

/// Ensure a logo exists on disk for a title, downloading one if possible.
pub async fn download_logo(
    http: &Client,
    logos_dir: &Path,
    title: &str,
    mirror_url: Option<&str>,
    source_logo_url: Option<&str>,
) {
    if find_logo_file(logos_dir, title).is_some() {
        return;
    }

    let slug = slugify(title);

    if let Some(mirror) = mirror_url {
        let mirror = mirror.trim_end_matches('/');
        for extension in SUPPORTED_TVG_LOGO_EXTENSIONS {
            let file_name = format!("{slug}.{extension}");
            let url = format!("{mirror}/{file_name}");
            if let Some(bytes) = fetch_logo_bytes(http, &url, title).await {
                write_logo(logos_dir, &file_name, &bytes).await;
                return;
            }
        }
    }

    let Some(source_url) = source_logo_url.filter(|url| !url.is_empty()) else {
        tracing::debug!("No TVG logo URL found for {}", title);
        return;
    };

    let extension = source_url
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if !SUPPORTED_TVG_LOGO_EXTENSIONS.contains(&extension.as_str()) {
        tracing::warn!(
            "Unsupported TVG logo file extension for {}: {}",
            title,
            extension
        );
        return;
    }

    tracing::info!("Downloading TVG logo for {} from {}", title, source_url);
    if let Some(bytes) = fetch_logo_bytes(http, source_url, title).await {
        write_logo(logos_dir, &format!("{slug}.{extension}"), &bytes).await;
    }
}

async fn fetch_logo_bytes(http: &Client, url: &str, title: &str) -> Option<Vec<u8>> {
    let response = http
        .get(url)
        .timeout(LOGO_FETCH_TIMEOUT)
        .send()
        .await
        .and_then(|resp| resp.error_for_status());

    let bytes = match response {
        Ok(resp) => match resp.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracing::debug!("Error reading TVG logo body for {} [{}]: {}", title, url, e);
                return None;
            }
        },
        Err(e) => {
            tracing::debug!("Error downloading TVG logo for {} [{}]: {}", title, url, e);
            return None;
        }
    };

    if looks_like_lfs_pointer(&bytes) {
        tracing::warn!(
            "TVG logo for {} appears to be a Git LFS placeholder, skipping",
            title
        );
        return None;
    }

    Some(bytes)
}

async fn write_logo(logos_dir: &Path, file_name: &str, bytes: &[u8]) {
    if let Err(e) = tokio::fs::create_dir_all(logos_dir).await {
        tracing::error!("Failed to create logo directory: {}", e);
        return;
    }
    if let Err(e) = tokio::fs::write(logos_dir.join(file_name), bytes).await {
        tracing::error!("Failed to write logo {}: {}", file_name, e);
    }
}

fn looks_like_lfs_pointer(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).contains("git-lfs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_logo_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bbc-one-uk.png"), b"png").unwrap();

        assert_eq!(
            find_logo_file(tmp.path(), "BBC One [UK]"),
            Some("bbc-one-uk.png".to_string())
        );
        assert_eq!(find_logo_file(tmp.path(), "Unknown"), None);
    }

    #[test]
    fn test_lfs_pointer_detected() {
        let pointer = b"version https://git-lfs.github.com/spec/v1\noid sha256:abc";
        assert!(looks_like_lfs_pointer(pointer));
        assert!(!looks_like_lfs_pointer(b"\x89PNG\r\n"));
    }
}
