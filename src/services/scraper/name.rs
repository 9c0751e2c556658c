//! Stream name processing: cleanup, filtering, tvg-id and category derivation

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::TitleFilter;
use crate::util::ids::ACE_URL_PREFIXES_CONTENT_ID;

/// HTML sources produce noisy titles; anything longer gets cut.
const STREAM_TITLE_MAX_LENGTH: usize = 50;

lazy_static! {
    static ref ACE_ID_IN_TEXT: Regex = Regex::new(r"\b[0-9a-fA-F]{40}\b").unwrap();
    static ref COUNTRY_CODE_BRACKET: Regex = Regex::new(r"\[([A-Z]{2})\]").unwrap();
    static ref COUNTRY_CODE_AT_END: Regex = Regex::new(r"\[\w{2}\]\s*$").unwrap();
    // "Name.uk" at the end of a tvg-id, or "UK " / "UK: " at the start
    static ref TVG_ID_COUNTRY_SUFFIX: Regex = Regex::new(r"\.(\w{2})\s*$").unwrap();
    static ref TVG_ID_COUNTRY_PREFIX: Regex = Regex::new(r"^(\w{2})[ :]").unwrap();

    static ref COMPILED_REGEX_CACHE: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
}

/// Strip stream URLs, embedded 40-hex ids and trailing junk from a title
/// candidate.
pub fn cleanup_candidate_title(title: &str) -> String {
    let mut title = title.trim().to_string();

    for prefix in ACE_URL_PREFIXES_CONTENT_ID {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.to_string();
        }
    }

    let title = title.lines().next().unwrap_or_default().trim();
    ACE_ID_IN_TEXT.replace_all(title, "").trim().to_string()
}

/// Apply a source's post-processing regexes to each candidate, dropping
/// candidates that end up empty or all-punctuation.
pub fn candidates_regex_cleanup(candidates: Vec<String>, regex_list: &[String]) -> Vec<String> {
    if regex_list.is_empty() {
        return candidates;
    }

    let mut cleaned = Vec::new();
    for title in candidates {
        let mut wip = title.clone();
        for pattern in regex_list {
            if let Some(regex) = compile_cached(pattern) {
                wip = regex.replace_all(&wip, "").trim().to_string();
            }
        }
        let wip = wip.trim().to_string();

        if !wip.is_empty() && wip.chars().any(|c| c.is_alphanumeric()) {
            if wip != title {
                tracing::trace!("Regex cleaned up title from '{}' to '{}'", title, wip);
            }
            cleaned.push(wip);
        }
    }

    cleaned
}

fn compile_cached(pattern: &str) -> Option<Regex> {
    let mut cache = COMPILED_REGEX_CACHE.lock().ok()?;
    if let Some(regex) = cache.get(pattern) {
        return Some(regex.clone());
    }
    match Regex::new(pattern) {
        Ok(regex) => {
            cache.insert(pattern.to_string(), regex.clone());
            Some(regex)
        }
        Err(e) => {
            tracing::warn!("Invalid postprocessing regex '{}': {}", pattern, e);
            None
        }
    }
}

/// Evaluate the title filter rules in order, short-circuiting on the first
/// rule that fires. All comparisons are case-insensitive substrings.
pub fn check_title_allowed(title: &str, filter: &TitleFilter) -> bool {
    if title.is_empty() {
        return false;
    }

    let title = title.to_lowercase();
    let matches = |words: &[String]| words.iter().any(|w| title.contains(&w.to_lowercase()));

    if matches(&filter.always_exclude_words) {
        return false;
    }
    if matches(&filter.always_include_words) {
        return true;
    }
    if matches(&filter.exclude_words) {
        return false;
    }
    if !filter.include_words.is_empty() {
        return matches(&filter.include_words);
    }

    true
}

pub fn trim_title(title: &str) -> String {
    if title.len() > STREAM_TITLE_MAX_LENGTH {
        let mut cut = STREAM_TITLE_MAX_LENGTH;
        while !title.is_char_boundary(cut) {
            cut -= 1;
        }
        title[..cut].trim().to_string()
    } else {
        title.trim().to_string()
    }
}

/// Derive a tvg-id from a title carrying a `[CC]` country bracket:
/// `"Name [CC]"` becomes `"Name.cc"`. Returns an empty string otherwise.
pub fn tvg_id_from_title(title: &str) -> String {
    if let Some(caps) = COUNTRY_CODE_BRACKET.captures(title) {
        let country = &caps[1];
        let name = title.replace(&format!("[{country}]"), "");
        return format!("{}.{}", name.trim(), country.to_lowercase());
    }
    String::new()
}

/// When a source supplies its own tvg-id, enrich the title with the embedded
/// country code if the title doesn't already carry one.
pub fn enrich_title_with_country(tvg_id: &str, title: &str) -> String {
    if COUNTRY_CODE_AT_END.is_match(title) {
        return title.to_string();
    }

    for regex in [&*TVG_ID_COUNTRY_SUFFIX, &*TVG_ID_COUNTRY_PREFIX] {
        if let Some(caps) = regex.captures(tvg_id) {
            let country = caps[1].to_uppercase();
            if !title.ends_with(&format!("[{country}]")) {
                return format!("{title} [{country}]");
            }
            break;
        }
    }

    title.to_string()
}

/// Map a raw group title (or the stream title) onto a configured category.
/// Falls back to sentence-casing the existing value, then `"General"`.
pub fn populate_group_title(
    group_title: &str,
    title: &str,
    category_mapping: &HashMap<String, Vec<String>>,
) -> String {
    let group_lower = group_title.to_lowercase();
    let title_lower = title.to_lowercase();

    let mut group_title = group_title.to_string();
    let mut categories: Vec<&String> = category_mapping.keys().collect();
    categories.sort();

    for category in categories {
        let keywords = &category_mapping[category];
        if keywords.iter().any(|k| group_lower.contains(k))
            || keywords.iter().any(|k| title_lower.contains(k))
        {
            group_title = category.clone();
            break;
        }
    }

    let group_title = capitalise(group_title.trim());
    if group_title.is_empty() {
        "General".to_string()
    } else {
        group_title
    }
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Title override configured against a content id or infohash.
pub fn title_override<'a>(
    overrides: &'a HashMap<String, String>,
    content_id: &str,
    infohash: Option<&str>,
) -> Option<&'a String> {
    if !content_id.is_empty() {
        if let Some(name) = overrides.get(content_id) {
            return Some(name);
        }
    }
    infohash.and_then(|infohash| overrides.get(infohash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(
        always_exclude: &[&str],
        always_include: &[&str],
        exclude: &[&str],
        include: &[&str],
    ) -> TitleFilter {
        TitleFilter {
            always_exclude_words: always_exclude.iter().map(|s| s.to_string()).collect(),
            always_include_words: always_include.iter().map(|s| s.to_string()).collect(),
            exclude_words: exclude.iter().map(|s| s.to_string()).collect(),
            include_words: include.iter().map(|s| s.to_string()).collect(),
            regex_postprocessing: vec![],
        }
    }

    #[test]
    fn test_title_filter_order() {
        let f = filter(&["Adult"], &[], &[], &["[UK]"]);
        assert!(!check_title_allowed("Adult [UK] Drama", &f));
        assert!(check_title_allowed("BBC [UK]", &f));
        assert!(!check_title_allowed("Generic [DE]", &f));
    }

    #[test]
    fn test_title_filter_always_include_beats_exclude() {
        let f = filter(&[], &["keep me"], &["keep"], &[]);
        assert!(check_title_allowed("Keep Me Around", &f));
        assert!(!check_title_allowed("Keep Out", &f));
    }

    #[test]
    fn test_title_filter_default_allows() {
        let f = filter(&[], &[], &[], &[]);
        assert!(check_title_allowed("Anything", &f));
        assert!(!check_title_allowed("", &f));
    }

    #[test]
    fn test_cleanup_candidate_title() {
        let id = "a".repeat(40);
        assert_eq!(
            cleanup_candidate_title(&format!("  Channel One {id} ")),
            "Channel One"
        );
        assert_eq!(
            cleanup_candidate_title(&format!("acestream://{id}")),
            ""
        );
        assert_eq!(cleanup_candidate_title("Multi\nLine"), "Multi");
    }

    #[test]
    fn test_tvg_id_from_title() {
        assert_eq!(tvg_id_from_title("BBC One [UK]"), "BBC One.uk");
        assert_eq!(tvg_id_from_title("No Country"), "");
    }

    #[test]
    fn test_enrich_title_with_country() {
        assert_eq!(
            enrich_title_with_country("BBC One.uk", "BBC One"),
            "BBC One [UK]"
        );
        assert_eq!(
            enrich_title_with_country("BBC One.uk", "BBC One [UK]"),
            "BBC One [UK]"
        );
        assert_eq!(
            enrich_title_with_country("UK: BBC One", "BBC One"),
            "BBC One [UK]"
        );
        assert_eq!(enrich_title_with_country("plainid", "Name"), "Name");
    }

    #[test]
    fn test_populate_group_title() {
        let mapping = crate::config::ScraperConf::default().category_mapping;
        assert_eq!(populate_group_title("sport", "x", &mapping), "Sports");
        assert_eq!(
            populate_group_title("", "Premier League Football", &mapping),
            "Sports"
        );
        assert_eq!(populate_group_title("docs", "Some Show", &mapping), "Docs");
        assert_eq!(populate_group_title("", "Some Show", &mapping), "General");
    }

    #[test]
    fn test_candidates_regex_cleanup() {
        let cleaned = candidates_regex_cleanup(
            vec!["Channel HD *LIVE*".to_string(), "***".to_string()],
            &[r"\*LIVE\*".to_string()],
        );
        assert_eq!(cleaned, vec!["Channel HD".to_string()]);
    }

    #[test]
    fn test_trim_title() {
        let long = "x".repeat(80);
        assert_eq!(trim_title(&long).len(), 50);
        assert_eq!(trim_title(" short "), "short");
    }
}
