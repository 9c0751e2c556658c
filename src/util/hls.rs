//! HLS playlist helpers: source rewriting and segment discovery

/// Engine paths that must be rewritten to the gateway's external origin.
pub const CONTENT_PATHS: [&str; 3] = ["/ace/c/", "/hls/c/", "/hls/m/"];

/// Headers never copied through the reverse proxy.
pub const EXCLUDED_PROXY_HEADERS: [&str; 5] = [
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

/// Rewrite engine-origin lines in an HLS playlist to the gateway origin.
///
/// Lines mentioning `#EXT-X-MEDIA:URI=` are dropped entirely since some
/// players choke on them. The stream token is appended to every rewritten
/// line when non-empty.
pub fn rewrite_playlist_sources(
    playlist: &str,
    ace_address: &str,
    external_url: &str,
    token: &str,
) -> String {
    if playlist.is_empty() {
        tracing::warn!("Received empty playlist for source rewriting");
        return String::new();
    }

    let ace_address = ensure_trailing_slash(ace_address);
    let external_url = ensure_trailing_slash(external_url);

    let mut out: Vec<String> = Vec::new();
    for line in playlist.lines() {
        let line = line.trim();

        if line.contains("#EXT-X-MEDIA:URI=") {
            continue;
        }

        if CONTENT_PATHS.iter().any(|path| line.contains(path)) {
            let mut rewritten = line.replace(&ace_address, &external_url);
            if !token.is_empty() {
                rewritten.push_str(&format!("?token={token}"));
            }
            out.push(rewritten);
        } else {
            out.push(line.to_string());
        }
    }

    out.join("\n")
}

/// Find the URL of the last media segment in a playlist, resolving relative
/// paths against the playlist's own URL.
pub fn last_segment_url(playlist: &str, playlist_url: &str) -> Option<String> {
    let last = playlist
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;

    if last.starts_with("http://") || last.starts_with("https://") {
        return Some(last.to_string());
    }

    let base = url::Url::parse(playlist_url).ok()?;
    base.join(last).ok().map(|u| u.to_string())
}

/// Normalise a URL string to always end with a single slash.
pub fn ensure_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_rewrite_segments_to_gateway() {
        let playlist = format!(
            "#EXTM3U\n#EXTINF:6.0,\nhttp://localhost:6878/ace/c/{CID}/1.ts\n"
        );
        let out = rewrite_playlist_sources(
            &playlist,
            "http://localhost:6878/",
            "http://gw.example/",
            "T",
        );
        assert!(out.contains(&format!("http://gw.example/ace/c/{CID}/1.ts?token=T")));
        assert!(!out.contains("localhost:6878"));
    }

    #[test]
    fn test_rewrite_drops_media_uri_lines() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA:URI=\"something.m3u8\"\n#EXTINF:6.0,\n/hls/c/x/1.ts";
        let out = rewrite_playlist_sources(
            playlist,
            "http://localhost:6878/",
            "http://gw.example/",
            "",
        );
        assert!(!out.contains("#EXT-X-MEDIA:URI="));
        // No token appended when the token is empty
        assert!(out.contains("/hls/c/x/1.ts"));
        assert!(!out.contains("?token="));
    }

    #[test]
    fn test_rewrite_empty_playlist() {
        assert_eq!(
            rewrite_playlist_sources("", "http://a/", "http://b/", ""),
            ""
        );
    }

    #[test]
    fn test_last_segment_url_absolute() {
        let playlist = "#EXTM3U\n#EXTINF:6.0,\nhttp://ace/ace/c/x/41.ts";
        assert_eq!(
            last_segment_url(playlist, "http://ace/ace/manifest.m3u8"),
            Some("http://ace/ace/c/x/41.ts".to_string())
        );
    }

    #[test]
    fn test_last_segment_url_relative() {
        let playlist = "#EXTM3U\n#EXTINF:6.0,\n41.ts";
        assert_eq!(
            last_segment_url(playlist, "http://ace:6878/hls/c/x/manifest.m3u8"),
            Some("http://ace:6878/hls/c/x/41.ts".to_string())
        );
    }

    #[test]
    fn test_ensure_trailing_slash() {
        assert_eq!(ensure_trailing_slash("http://a"), "http://a/");
        assert_eq!(ensure_trailing_slash("http://a//"), "http://a/");
    }
}
