//! M3U playlist line construction for IPTV output

/// Build the `#EXTINF` line for one catalog entry.
///
/// The logo attribute is only emitted when the entry has a stored logo file,
/// and points back at the gateway's `/tvg-logo/` route so clients never see
/// the source URL.
pub fn create_extinf_line(
    title: &str,
    tvg_id: &str,
    tvg_logo: Option<&str>,
    group_title: &str,
    external_url: &str,
    token: &str,
    last_found_epoch: i64,
) -> String {
    let token_suffix = if token.is_empty() {
        String::new()
    } else {
        format!("?token={token}")
    };

    let base = external_url.trim_end_matches('/');

    let mut parts: Vec<String> = vec!["#EXTINF:-1".to_string()];
    if let Some(logo) = tvg_logo.filter(|logo| !logo.is_empty()) {
        parts.push(format!("tvg-logo=\"{base}/tvg-logo/{logo}{token_suffix}\""));
    }
    parts.push(format!("tvg-id=\"{tvg_id}\""));
    parts.push(format!("group-title=\"{group_title}\""));
    parts.push(format!("x-last-found=\"{last_found_epoch}\""));

    format!("{}, {title}\n", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extinf_with_logo() {
        let line = create_extinf_line(
            "BBC One [UK]",
            "BBC One.uk",
            Some("bbc-one-uk.png"),
            "General",
            "http://gw.example/",
            "T",
            1700000000,
        );
        assert_eq!(
            line,
            "#EXTINF:-1 tvg-logo=\"http://gw.example/tvg-logo/bbc-one-uk.png?token=T\" \
             tvg-id=\"BBC One.uk\" group-title=\"General\" x-last-found=\"1700000000\", BBC One [UK]\n"
        );
    }

    #[test]
    fn test_extinf_without_logo_or_token() {
        let line = create_extinf_line("Chan", "Chan.au", None, "Sports", "http://gw/", "", 0);
        assert!(line.starts_with("#EXTINF:-1 tvg-id=\"Chan.au\""));
        assert!(!line.contains("tvg-logo"));
        assert!(!line.contains("?token="));
    }
}
