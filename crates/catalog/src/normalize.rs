use std::collections::HashMap;

use common::{
    collapse_whitespace, is_remote_url, search_key, sort_value, url_to_path, AttrMap, Role,
    TagValue, TrackRow,
};

use crate::prefs::CatalogPrefs;

/// Attributes applied directly onto the track row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Immediate {
    pub title: String,
    pub title_sort: String,
    pub title_search: String,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub year: Option<i32>,
    pub track_gain: Option<f64>,
    pub track_peak: Option<f64>,
    pub content_type: Option<String>,
    pub remote: bool,
    pub tags_read: bool,
}

/// Attributes that need a persisted track row before they can be
/// applied (foreign keys, mapping rows, album state).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deferred {
    pub album: Option<String>,
    pub album_sort: Option<String>,
    pub disc_count: Option<u32>,
    pub contributors: Vec<(Role, Vec<String>)>,
    pub contributor_sorts: HashMap<Role, String>,
    pub genres: Vec<String>,
    pub comments: Vec<String>,
    pub compilation: Option<String>,
    pub musicbrainz_id: Option<String>,
    pub contributor_musicbrainz: Option<String>,
    pub album_gain: Option<f64>,
    pub album_peak: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Normalized {
    pub immediate: Immediate,
    pub deferred: Deferred,
}

/// Pure transformation of a raw tag map into (immediate, deferred)
/// attributes. No I/O; every call path (create or update) goes through
/// here so output formatting stays consistent.
pub fn normalize_tags(
    raw: &AttrMap,
    url: &str,
    creating: bool,
    prefs: &CatalogPrefs,
) -> Normalized {
    let mut immediate = Immediate::default();
    let mut deferred = Deferred::default();

    // Multi-valued titles collapse to a single display string.
    let title = raw
        .get("TITLE")
        .map(joined_value)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_from_url(url));
    let title_sort_source = raw
        .get("TITLESORT")
        .map(joined_value)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title.clone());
    // Sort tags may disagree with the display tag, so the sort value is
    // always re-normalized rather than trusted.
    immediate.title_sort = sort_value(&title_sort_source, &prefs.articles);
    immediate.title_search = search_key(&title, &prefs.articles);
    immediate.title = collapse_whitespace(&title);

    immediate.remote = is_remote_url(url);
    immediate.track_no = raw.get("TRACKNUM").and_then(|v| parse_index(v.first()?));
    immediate.disc_no = raw.get("DISC").and_then(|v| parse_index(v.first()?));
    immediate.year = raw.get("YEAR").and_then(|v| parse_year(v.first()?));

    // Replay gain tags arrive under long names with unit suffixes.
    immediate.track_gain = raw
        .get("REPLAYGAIN_TRACK_GAIN")
        .and_then(|v| parse_gain(v.first()?));
    immediate.track_peak = raw
        .get("REPLAYGAIN_TRACK_PEAK")
        .and_then(|v| parse_gain(v.first()?));
    deferred.album_gain = raw
        .get("REPLAYGAIN_ALBUM_GAIN")
        .and_then(|v| parse_gain(v.first()?));
    deferred.album_peak = raw
        .get("REPLAYGAIN_ALBUM_PEAK")
        .and_then(|v| parse_gain(v.first()?));

    deferred.album = raw
        .get("ALBUM")
        .map(joined_value)
        .filter(|a| !a.is_empty());
    deferred.album_sort = raw
        .get("ALBUMSORT")
        .map(joined_value)
        .filter(|a| !a.is_empty());
    deferred.disc_count = raw.get("DISCC").and_then(|v| parse_index(v.first()?));
    deferred.compilation = raw
        .get("COMPILATION")
        .and_then(|v| v.first())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    deferred.musicbrainz_id = raw
        .get("MUSICBRAINZ_ID")
        .and_then(|v| v.first())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    deferred.contributor_musicbrainz = raw
        .get("MUSICBRAINZ_ARTIST_ID")
        .and_then(|v| v.first())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    for role in Role::PRECEDENCE {
        if let Some(value) = raw.get(role.tag_key()) {
            let names = value.split_values();
            if !names.is_empty() {
                deferred.contributors.push((role, names));
            }
        }
        if let Some(sort_key_name) = role.sort_tag_key() {
            if let Some(value) = raw.get(sort_key_name).and_then(|v| v.first()) {
                let normalized = sort_value(value, &prefs.articles);
                if !normalized.is_empty() {
                    deferred.contributor_sorts.insert(role, normalized);
                }
            }
        }
    }

    if let Some(value) = raw.get("GENRE") {
        deferred.genres = value.split_values();
    }
    if let Some(value) = raw.get("COMMENT") {
        deferred.comments = value
            .values()
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .collect();
    }

    // New rows default their content type from the file itself and are
    // flagged as tag-read.
    if creating {
        immediate.content_type = raw
            .get("CONTENT_TYPE")
            .and_then(|v| v.first())
            .map(|v| v.to_string())
            .or_else(|| detect_content_type(url));
    }
    immediate.tags_read = true;

    Normalized {
        immediate,
        deferred,
    }
}

pub fn apply_immediate(track: &mut TrackRow, immediate: &Immediate) {
    track.title = immediate.title.clone();
    track.title_sort = immediate.title_sort.clone();
    track.title_search = immediate.title_search.clone();
    track.remote = immediate.remote;
    track.tags_read = immediate.tags_read;
    if immediate.track_no.is_some() {
        track.track_no = immediate.track_no;
    }
    if immediate.disc_no.is_some() {
        track.disc_no = immediate.disc_no;
    }
    if immediate.year.is_some() {
        track.year = immediate.year;
    }
    if immediate.track_gain.is_some() {
        track.track_gain = immediate.track_gain;
    }
    if immediate.track_peak.is_some() {
        track.track_peak = immediate.track_peak;
    }
    if let Some(content_type) = &immediate.content_type {
        track.content_type = Some(content_type.clone());
        track.virtual_entry = content_type == "dir";
        track.audio = track.remote || tags::is_audio_type(content_type);
    }
}

fn joined_value(value: &TagValue) -> String {
    match value {
        TagValue::One(v) => v.trim().to_string(),
        TagValue::Many(values) => {
            let parts: Vec<&str> = values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .collect();
            parts.join(" / ")
        }
    }
}

fn detect_content_type(url: &str) -> Option<String> {
    let path = url_to_path(url)?;
    Some(tags::content_type_for_path(&path))
}

/// Last path segment without extension; the fallback title for files
/// with no usable tags.
fn title_from_url(url: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or(url);
    let stem = match tail.rfind('.') {
        Some(idx) if idx > 0 => &tail[..idx],
        _ => tail,
    };
    let stem = stem.trim();
    if stem.is_empty() {
        "Untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Parses "3" or "3/12" style index tags.
fn parse_index(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Parses replay-gain values, stripping "dB" style unit suffixes.
fn parse_gain(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let numeric: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .collect();
    numeric.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AttrMap;

    fn attrs(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), TagValue::One(v.to_string())))
            .collect()
    }

    fn prefs() -> CatalogPrefs {
        CatalogPrefs::default()
    }

    #[test]
    fn multi_valued_titles_collapse_with_slash() {
        let mut raw = AttrMap::new();
        raw.insert(
            "TITLE".to_string(),
            TagValue::Many(vec!["One".to_string(), "Two".to_string()]),
        );
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert_eq!(normalized.immediate.title, "One / Two");
    }

    #[test]
    fn sort_and_search_are_derived_from_title() {
        let raw = attrs(&[("TITLE", "The Long Road")]);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert_eq!(normalized.immediate.title_sort, "Long Road");
        assert_eq!(normalized.immediate.title_search, "long road");
    }

    #[test]
    fn explicit_sort_tag_is_renormalized() {
        let raw = attrs(&[("TITLE", "Help!"), ("TITLESORT", "The  Help")]);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert_eq!(normalized.immediate.title_sort, "Help");
    }

    #[test]
    fn missing_title_falls_back_to_filename() {
        let raw = AttrMap::new();
        let normalized = normalize_tags(&raw, "file:///m/a/03%20song.mp3", true, &prefs());
        assert_eq!(normalized.immediate.title, "03%20song");
    }

    #[test]
    fn remote_flag_follows_url_scheme() {
        let raw = attrs(&[("TITLE", "Stream")]);
        let normalized = normalize_tags(&raw, "http://radio.example/live", true, &prefs());
        assert!(normalized.immediate.remote);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert!(!normalized.immediate.remote);
    }

    #[test]
    fn gain_tags_are_renamed_and_unit_stripped() {
        let raw = attrs(&[
            ("REPLAYGAIN_TRACK_GAIN", "-6.20 dB"),
            ("REPLAYGAIN_TRACK_PEAK", "0.988"),
            ("REPLAYGAIN_ALBUM_GAIN", "+1.5 dB"),
        ]);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert_eq!(normalized.immediate.track_gain, Some(-6.2));
        assert_eq!(normalized.immediate.track_peak, Some(0.988));
        assert_eq!(normalized.deferred.album_gain, Some(1.5));
    }

    #[test]
    fn relational_tags_are_deferred() {
        let raw = attrs(&[
            ("TITLE", "Song"),
            ("ALBUM", "Record"),
            ("ALBUMSORT", "Record"),
            ("ARTIST", "X; Y"),
            ("COMPOSER", "Z"),
            ("GENRE", "Rock"),
            ("COMMENT", "nice"),
            ("DISCC", "2"),
            ("COMPILATION", "1"),
            ("MUSICBRAINZ_ARTIST_ID", "mb-artist"),
        ]);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        let deferred = &normalized.deferred;
        assert_eq!(deferred.album.as_deref(), Some("Record"));
        assert_eq!(deferred.contributor_musicbrainz.as_deref(), Some("mb-artist"));
        assert_eq!(deferred.disc_count, Some(2));
        assert_eq!(deferred.compilation.as_deref(), Some("1"));
        assert_eq!(deferred.genres, vec!["Rock"]);
        assert_eq!(deferred.comments, vec!["nice"]);
        let artist = deferred
            .contributors
            .iter()
            .find(|(role, _)| *role == Role::Artist)
            .unwrap();
        assert_eq!(artist.1, vec!["X", "Y"]);
        assert!(deferred
            .contributors
            .iter()
            .any(|(role, _)| *role == Role::Composer));
    }

    #[test]
    fn content_type_defaults_from_file_type_on_create() {
        let raw = attrs(&[("TITLE", "Song")]);
        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", true, &prefs());
        assert_eq!(normalized.immediate.content_type.as_deref(), Some("mp3"));
        assert!(normalized.immediate.tags_read);

        let normalized = normalize_tags(&raw, "file:///m/a/1.mp3", false, &prefs());
        assert_eq!(normalized.immediate.content_type, None);
    }

    #[test]
    fn track_numbers_parse_with_totals() {
        assert_eq!(parse_index("3/12"), Some(3));
        assert_eq!(parse_index(" 7 "), Some(7));
        assert_eq!(parse_index("x"), None);
        assert_eq!(parse_year("2001-05-01"), Some(2001));
    }
}
