//! Identifier helpers: slugs, 40-hex stream ids, tvg-id normalisation
//!
//! Content ids and infohashes share the same shape (40 lowercase hex chars)
//! but live in different namespaces, so extraction from a URL is always
//! prefix-driven.

use lazy_static::lazy_static;
use regex::Regex;

/// Length of an AceStream content id / infohash.
pub const ACE_ID_LENGTH: usize = 40;

/// Known URL prefixes that carry a content id after the prefix.
pub const ACE_URL_PREFIXES_CONTENT_ID: [&str; 6] = [
    "acestream://",
    "http://127.0.0.1:6878/ace/getstream?id=",
    "http://127.0.0.1:6878/ace/getstream?content_id=",
    "http://127.0.0.1:6878/ace/manifest.m3u8?id=",
    "http://127.0.0.1:6878/ace/manifest.m3u8?content_id=",
    "plugin://script.module.horus?action=play&id=",
];

/// Known URL prefixes that carry an infohash after the prefix.
pub const ACE_URL_PREFIXES_INFOHASH: [&str; 2] = [
    "http://127.0.0.1:6878/ace/getstream?infohash=",
    "http://127.0.0.1:6878/ace/manifest.m3u8?infohash=",
];

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-zA-Z0-9-]").unwrap();
    static ref MULTI_SPACE: Regex = Regex::new(r"\s{2,}").unwrap();
    static ref HEX: Regex = Regex::new(r"^[0-9a-f]{40}$").unwrap();

    // "XX | Channel Name"
    static ref TVG_ID_LEADING_COUNTRY: Regex =
        Regex::new(r"(?i)^([a-z]{2})\s*\|\s*(.+)$").unwrap();
    // "Channel Name.xx" / "_xx" / "-xx"
    static ref TVG_ID_TRAILING_COUNTRY: Regex = Regex::new(r"(?i)^(.*)[._-]([a-z]{2})$").unwrap();
    // "Channel Name.xx2"
    static ref TVG_ID_TRAILING_COUNTRY_NUMBERED: Regex =
        Regex::new(r"(?i)^(.*)[._-]([a-z]{2}\d+)$").unwrap();
    static ref TRAILING_NUMBERS: Regex = Regex::new(r"(.*?)(\s*\d+)$").unwrap();
}

/// Convert arbitrary text to a filesystem/URL safe slug.
///
/// `+` becomes `plus`, every other non-alphanumeric run collapses to a single
/// hyphen. The result is lowercase and idempotent.
pub fn slugify(input: &str) -> String {
    let replaced = input.replace('+', "plus");
    let spaced = NON_ALPHANUMERIC.replace_all(&replaced, " ");
    let collapsed = MULTI_SPACE.replace_all(&spaced, " ");
    collapsed
        .trim()
        .replace(' ', "-")
        .to_lowercase()
        .trim_matches('-')
        .to_string()
}

/// Check if a string is a valid content id or infohash.
pub fn is_valid_ace_id(id: &str) -> bool {
    id.len() == ACE_ID_LENGTH && HEX.is_match(&id.to_lowercase())
}

/// Short form of an ace id for log lines.
pub fn ace_id_short(id: &str) -> String {
    if id.len() < 8 {
        return id.to_string();
    }
    format!("{}...", &id[..8])
}

fn extract_after_prefix(url: &str, prefixes: &[&str]) -> Option<String> {
    for prefix in prefixes {
        if let Some(rest) = url.strip_prefix(prefix) {
            if is_valid_ace_id(rest) {
                return Some(rest.to_lowercase());
            }
        }
    }
    None
}

/// Extract a content id from a recognised stream reference URL.
pub fn extract_content_id_from_url(url: &str) -> Option<String> {
    extract_after_prefix(url, &ACE_URL_PREFIXES_CONTENT_ID)
}

/// Extract an infohash from a recognised stream reference URL.
pub fn extract_infohash_from_url(url: &str) -> Option<String> {
    extract_after_prefix(url, &ACE_URL_PREFIXES_INFOHASH)
}

/// Check whether a URL is a recognised stream reference of either kind.
pub fn is_ace_url(url: &str) -> bool {
    ACE_URL_PREFIXES_CONTENT_ID
        .iter()
        .chain(ACE_URL_PREFIXES_INFOHASH.iter())
        .any(|prefix| url.starts_with(prefix))
}

/// Normalise a tvg-id to the canonical `Name.cc` form.
///
/// The override map is consulted first. A trailing country code with a digit
/// suffix (`.uk2`) loses the digits. Both `"CC | Name"` and
/// `"Name.cc"`/`"Name_cc"`/`"Name-cc"` become `"Name.cc"`. Anything that
/// matches no rule is returned unchanged.
pub fn normalise_tvg_id(
    tvg_id: &str,
    overrides: &std::collections::HashMap<String, String>,
) -> Option<String> {
    if tvg_id.is_empty() {
        return None;
    }

    if let Some(replacement) = overrides.get(tvg_id) {
        return Some(replacement.clone());
    }

    let mut tvg_id = tvg_id.to_string();
    if TVG_ID_TRAILING_COUNTRY_NUMBERED.is_match(&tvg_id) {
        tvg_id = TRAILING_NUMBERS.replace(&tvg_id, "$1").to_string();
    }

    let (channel_name, country_code) =
        if let Some(caps) = TVG_ID_LEADING_COUNTRY.captures(&tvg_id) {
            (caps[2].to_string(), caps[1].to_string())
        } else if let Some(caps) = TVG_ID_TRAILING_COUNTRY.captures(&tvg_id) {
            (caps[1].to_string(), caps[2].to_string())
        } else {
            return Some(tvg_id);
        };

    let channel_name = channel_name
        .replace('.', " ")
        .replace('_', " ")
        .replace("&amp;", "&")
        .trim()
        .to_string();
    let country_code = country_code.trim().to_lowercase();

    Some(format!("{channel_name}.{country_code}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
        assert_eq!(slugify("Another_Test@123"), "another-test-123");
        assert_eq!(slugify("C++ Channel"), "cplusplus-channel");
    }

    #[test]
    fn test_slugify_idempotent() {
        for input in ["Some Channel [UK]", "https://example.com/a?b=c", "-edge-"] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once);
            assert!(!once.starts_with('-') && !once.ends_with('-'));
            assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }
    }

    #[test]
    fn test_is_valid_ace_id() {
        assert!(is_valid_ace_id(&"a".repeat(40)));
        assert!(!is_valid_ace_id(&"a".repeat(39)));
        assert!(!is_valid_ace_id(&"g".repeat(40)));
    }

    #[test]
    fn test_extract_content_id() {
        let id = "a".repeat(40);
        let url = format!("acestream://{id}");
        assert_eq!(extract_content_id_from_url(&url), Some(id.clone()));

        let url = format!("http://127.0.0.1:6878/ace/getstream?id={id}");
        assert_eq!(extract_content_id_from_url(&url), Some(id.clone()));

        // Wrong namespace
        let url = format!("http://127.0.0.1:6878/ace/getstream?infohash={id}");
        assert_eq!(extract_content_id_from_url(&url), None);
        assert_eq!(extract_infohash_from_url(&url), Some(id));
    }

    #[test]
    fn test_extract_rejects_bad_ids() {
        let url = format!("acestream://{}", "z".repeat(40));
        assert_eq!(extract_content_id_from_url(&url), None);
    }

    #[test]
    fn test_normalise_tvg_id() {
        let none = HashMap::new();
        assert_eq!(
            normalise_tvg_id("AU | Test Channel 1", &none),
            Some("Test Channel 1.au".to_string())
        );
        assert_eq!(
            normalise_tvg_id("Test_Channel_2.uk", &none),
            Some("Test Channel 2.uk".to_string())
        );
        assert_eq!(
            normalise_tvg_id("Test Channel 5.uk2", &none),
            Some("Test Channel 5.uk".to_string())
        );
        assert_eq!(
            normalise_tvg_id("NoCountryCodeHere", &none),
            Some("NoCountryCodeHere".to_string())
        );
    }

    #[test]
    fn test_normalise_tvg_id_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("weird.id".to_string(), "Nice Channel.au".to_string());
        assert_eq!(
            normalise_tvg_id("weird.id", &overrides),
            Some("Nice Channel.au".to_string())
        );
    }
}
