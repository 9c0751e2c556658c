//! EPG candidate collection and scoring
//!
//! For each wanted tvg-id, every source contributes one candidate holding
//! the raw `<channel>`/`<programme>` fragments whose (normalised) id
//! matched. Candidates are scored per source and the best one per tvg-id
//! wins a slot in the condensed guide.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::util::ids::normalise_tvg_id;

/// Fewer upcoming programmes (or described programmes) than this gates the
/// score hard.
const DESIRED_MIN_PROGRAMS: i64 = 5;

const XMLTV_TIME_FORMAT: &str = "%Y%m%d%H%M%S %z";

/// One captured `<programme>` with the facts scoring needs.
#[derive(Debug, Clone)]
pub struct ProgrammeFragment {
    pub xml: Vec<u8>,
    pub start: Option<DateTime<FixedOffset>>,
    pub desc_len: usize,
    pub has_icon: bool,
}

/// All fragments one source contributed for one tvg-id.
#[derive(Debug, Clone)]
pub struct EpgCandidate {
    pub tvg_id: String,
    pub epg_url: String,
    pub channels: Vec<Vec<u8>>,
    pub programmes: Vec<ProgrammeFragment>,
}

impl EpgCandidate {
    /// Capacity-first scoring: starved candidates are ranked purely by what
    /// little they have, healthy ones by volume and description richness.
    pub fn score(&self, now: DateTime<Utc>) -> i64 {
        let mut upcoming: i64 = 0;
        let mut with_desc: i64 = 0;
        let mut desc_len: i64 = 0;
        let mut with_icon: i64 = 0;

        for programme in &self.programmes {
            if let Some(start) = programme.start {
                if start >= now {
                    upcoming += 1;
                }
            }
            if programme.desc_len > 0 {
                with_desc += 1;
                desc_len += programme.desc_len as i64;
            }
            if programme.has_icon {
                with_icon += 1;
            }
        }

        if upcoming < DESIRED_MIN_PROGRAMS {
            upcoming
        } else if with_desc < DESIRED_MIN_PROGRAMS {
            DESIRED_MIN_PROGRAMS + with_desc
        } else {
            upcoming + with_desc + desc_len / 100 + with_icon
        }
    }
}

/// Candidates keyed by `(tvg_id, epg_url)`, kept in insertion order so score
/// ties go to the first source encountered.
#[derive(Debug, Default)]
pub struct CandidateStore {
    candidates: Vec<EpgCandidate>,
}

impl CandidateStore {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn entry(&mut self, tvg_id: &str, epg_url: &str) -> &mut EpgCandidate {
        let position = self
            .candidates
            .iter()
            .position(|c| c.tvg_id == tvg_id && c.epg_url == epg_url);
        match position {
            Some(index) => &mut self.candidates[index],
            None => {
                self.candidates.push(EpgCandidate {
                    tvg_id: tvg_id.to_string(),
                    epg_url: epg_url.to_string(),
                    channels: Vec::new(),
                    programmes: Vec::new(),
                });
                self.candidates
                    .last_mut()
                    .expect("just pushed a candidate")
            }
        }
    }

    pub fn add_channel(&mut self, tvg_id: &str, epg_url: &str, xml: Vec<u8>) {
        self.entry(tvg_id, epg_url).channels.push(xml);
    }

    pub fn add_programme(&mut self, tvg_id: &str, epg_url: &str, programme: ProgrammeFragment) {
        self.entry(tvg_id, epg_url).programmes.push(programme);
    }

    /// Highest-scoring candidate for a tvg-id; first encountered wins ties.
    pub fn best_candidate(&self, tvg_id: &str, now: DateTime<Utc>) -> Option<&EpgCandidate> {
        let matches: Vec<&EpgCandidate> = self
            .candidates
            .iter()
            .filter(|c| c.tvg_id == tvg_id)
            .collect();

        let mut best = *matches.first()?;
        if matches.len() == 1 {
            return Some(best);
        }

        let mut best_score = best.score(now);
        for candidate in &matches[1..] {
            let score = candidate.score(now);
            tracing::trace!(
                "tvg_id={} candidate {} score={} best={}",
                tvg_id,
                candidate.epg_url,
                score,
                best_score
            );
            if score > best_score {
                best = candidate;
                best_score = score;
            }
        }

        Some(best)
    }
}

/// Streaming-parse one source's XMLTV document, keeping only the elements
/// whose normalised id is in the wanted set. Ids inside the captured
/// fragments are rewritten to the normalised form.
pub fn collect_candidates(
    data: &[u8],
    epg_url: &str,
    wanted: &std::collections::HashSet<String>,
    overrides: &HashMap<String, String>,
    store: &mut CandidateStore,
) -> Result<(), quick_xml::Error> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref start) => match start.name().as_ref() {
                b"channel" => {
                    let raw_id = attribute_value(start, b"id");
                    let normalised = raw_id
                        .as_deref()
                        .and_then(|id| normalise_tvg_id(id, overrides));
                    if let Some(tvg_id) = normalised.filter(|id| wanted.contains(id)) {
                        let captured =
                            capture_element(&mut reader, start, b"channel", "id", &tvg_id)?;
                        store.add_channel(&tvg_id, epg_url, captured.xml);
                    } else {
                        skip_element(&mut reader, b"channel")?;
                    }
                }
                b"programme" => {
                    let raw_id = attribute_value(start, b"channel");
                    let normalised = raw_id
                        .as_deref()
                        .and_then(|id| normalise_tvg_id(id, overrides));
                    if let Some(tvg_id) = normalised.filter(|id| wanted.contains(id)) {
                        let start_time = attribute_value(start, b"start").and_then(|value| {
                            DateTime::parse_from_str(&value, XMLTV_TIME_FORMAT).ok()
                        });
                        let mut captured =
                            capture_element(&mut reader, start, b"programme", "channel", &tvg_id)?;
                        captured.start = start_time;
                        store.add_programme(&tvg_id, epg_url, captured);
                    } else {
                        skip_element(&mut reader, b"programme")?;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn attribute_value(start: &BytesStart, key: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

/// Serialise the current element (started by `start`) back to bytes,
/// rewriting `id_attr` to the normalised tvg-id and collecting description
/// length and icon presence along the way.
fn capture_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    tag: &[u8],
    id_attr: &str,
    new_id: &str,
) -> Result<ProgrammeFragment, quick_xml::Error> {
    let mut writer = Writer::new(Vec::new());

    let tag_name = String::from_utf8_lossy(tag).into_owned();
    let mut rewritten = BytesStart::new(tag_name.clone());
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == id_attr {
            rewritten.push_attribute((key.as_str(), new_id));
        } else {
            let value = attr.unescape_value().unwrap_or_default().into_owned();
            rewritten.push_attribute((key.as_str(), value.as_str()));
        }
    }
    writer.write_event(Event::Start(rewritten))?;

    let mut depth = 0usize;
    let mut in_desc = false;
    let mut desc_len = 0usize;
    let mut has_icon = false;

    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"desc" {
                    in_desc = true;
                } else if name == b"icon" {
                    has_icon = true;
                }
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) => {
                if e.name().as_ref() == b"icon" {
                    has_icon = true;
                }
                writer.write_event(Event::Empty(e.to_owned()))?;
            }
            Event::Text(ref e) => {
                if in_desc {
                    desc_len += e.unescape().map(|t| t.trim().len()).unwrap_or(0);
                }
                writer.write_event(Event::Text(e.to_owned()))?;
            }
            Event::CData(ref e) => {
                if in_desc {
                    desc_len += e.len();
                }
                writer.write_event(Event::CData(e.to_owned()))?;
            }
            Event::End(ref e) => {
                if depth == 0 && e.name().as_ref() == tag {
                    writer.write_event(Event::End(e.to_owned()))?;
                    break;
                }
                if e.name().as_ref() == b"desc" {
                    in_desc = false;
                }
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(ProgrammeFragment {
        xml: writer.into_inner(),
        start: None,
        desc_len,
        has_icon,
    })
}

/// Consume events until the current element closes.
fn skip_element(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), quick_xml::Error> {
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) if e.name().as_ref() == tag => depth += 1,
            Event::End(ref e) if e.name().as_ref() == tag => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => return Ok(()),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn programme(start: Option<DateTime<FixedOffset>>, desc_len: usize, icon: bool) -> ProgrammeFragment {
        ProgrammeFragment {
            xml: b"<programme/>".to_vec(),
            start,
            desc_len,
            has_icon: icon,
        }
    }

    fn future(now: DateTime<Utc>, hours: i64) -> Option<DateTime<FixedOffset>> {
        Some((now + Duration::hours(hours)).fixed_offset())
    }

    #[test]
    fn test_score_rich_candidate() {
        let now = Utc::now();
        let mut candidate = EpgCandidate {
            tvg_id: "Chan.au".to_string(),
            epg_url: "http://a".to_string(),
            channels: vec![],
            programmes: vec![],
        };
        // 6 upcoming, 6 with descriptions totalling 1200 chars, 3 with icons
        for n in 0..6 {
            candidate
                .programmes
                .push(programme(future(now, n + 1), 200, n < 3));
        }
        assert_eq!(candidate.score(now), 6 + 6 + 12 + 3);
    }

    #[test]
    fn test_score_starved_candidate_gated() {
        let now = Utc::now();
        let candidate = EpgCandidate {
            tvg_id: "Chan.au".to_string(),
            epg_url: "http://b".to_string(),
            channels: vec![],
            programmes: vec![
                programme(future(now, 1), 500, true),
                programme(future(now, 2), 500, true),
            ],
        };
        // Only 2 upcoming: capacity gate applies regardless of richness
        assert_eq!(candidate.score(now), 2);
    }

    #[test]
    fn test_score_description_gate() {
        let now = Utc::now();
        let mut candidate = EpgCandidate {
            tvg_id: "Chan.au".to_string(),
            epg_url: "http://c".to_string(),
            channels: vec![],
            programmes: vec![],
        };
        for n in 0..8 {
            // Plenty upcoming, only 2 described
            candidate.programmes.push(programme(future(now, n + 1), if n < 2 { 100 } else { 0 }, false));
        }
        assert_eq!(candidate.score(now), 5 + 2);
    }

    #[test]
    fn test_best_candidate_highest_score_wins() {
        let now = Utc::now();
        let mut store = CandidateStore::default();
        for n in 0..6 {
            store.add_programme(
                "Chan.au",
                "http://rich",
                programme(future(now, n + 1), 200, true),
            );
        }
        store.add_programme("Chan.au", "http://poor", programme(future(now, 1), 0, false));

        let best = store.best_candidate("Chan.au", now).unwrap();
        assert_eq!(best.epg_url, "http://rich");
        assert!(store.best_candidate("Missing.id", now).is_none());
    }

    #[test]
    fn test_collect_candidates_rewrites_ids() {
        let xml = br#"<?xml version="1.0"?>
<tv>
  <channel id="chan.au2"><display-name>Chan</display-name></channel>
  <channel id="other.id"><display-name>Other</display-name></channel>
  <programme channel="chan.au2" start="20300101120000 +0000">
    <title>Show</title>
    <desc>A description</desc>
    <icon src="http://img"/>
  </programme>
</tv>"#;

        let wanted: HashSet<String> = ["chan.au".to_string()].into_iter().collect();
        let mut store = CandidateStore::default();
        collect_candidates(xml, "http://src", &wanted, &HashMap::new(), &mut store).unwrap();

        assert_eq!(store.len(), 1);
        let best = store.best_candidate("chan.au", Utc::now()).unwrap();
        assert_eq!(best.channels.len(), 1);
        assert_eq!(best.programmes.len(), 1);

        let channel_xml = String::from_utf8(best.channels[0].clone()).unwrap();
        assert!(channel_xml.contains(r#"id="chan.au""#));

        let programme = &best.programmes[0];
        let programme_xml = String::from_utf8(programme.xml.clone()).unwrap();
        assert!(programme_xml.contains(r#"channel="chan.au""#));
        assert!(programme.has_icon);
        assert_eq!(programme.desc_len, "A description".len());
        assert!(programme.start.is_some());
    }
}
