use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type RowId = u64;

/// Articles stripped from the front of sort and search values.
pub const DEFAULT_ARTICLES: &[&str] = &[
    "The", "A", "An", "El", "La", "Los", "Las", "Le", "Les", "Die", "Der", "Das",
];

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";
pub const VARIOUS_ARTISTS: &str = "Various Artists";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    AlbumArtist,
    Artist,
    Band,
    Composer,
    Conductor,
}

impl Role {
    /// Resolution order; the first role found on a track supplies its
    /// primary contributor.
    pub const PRECEDENCE: [Role; 5] = [
        Role::AlbumArtist,
        Role::Artist,
        Role::Band,
        Role::Composer,
        Role::Conductor,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            Role::AlbumArtist => 0,
            Role::Artist => 1,
            Role::Band => 2,
            Role::Composer => 3,
            Role::Conductor => 4,
        }
    }

    pub fn tag_key(self) -> &'static str {
        match self {
            Role::AlbumArtist => "ALBUMARTIST",
            Role::Artist => "ARTIST",
            Role::Band => "BAND",
            Role::Composer => "COMPOSER",
            Role::Conductor => "CONDUCTOR",
        }
    }

    pub fn sort_tag_key(self) -> Option<&'static str> {
        match self {
            Role::AlbumArtist => Some("ALBUMARTISTSORT"),
            Role::Artist => Some("ARTISTSORT"),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Track,
    Album,
    Contributor,
    Genre,
}

/// Raw tag attribute value as delivered by a tag reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    One(String),
    Many(Vec<String>),
}

impl TagValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            TagValue::One(value) => Some(value.as_str()),
            TagValue::Many(values) => values.first().map(|v| v.as_str()),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            TagValue::One(value) => vec![value.as_str()],
            TagValue::Many(values) => values.iter().map(|v| v.as_str()).collect(),
        }
    }

    /// All values, joined multi-value fields first, then split on `;`.
    pub fn split_values(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.values() {
            for part in value.split(';') {
                let trimmed = part.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
        }
        out
    }
}

pub type AttrMap = HashMap<String, TagValue>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackRow {
    pub id: RowId,
    pub url: String,
    pub title: String,
    pub title_sort: String,
    pub title_search: String,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub disc_count: Option<u32>,
    pub year: Option<i32>,
    pub content_type: Option<String>,
    pub musicbrainz_id: Option<String>,
    pub track_gain: Option<f64>,
    pub track_peak: Option<f64>,
    pub file_size: Option<u64>,
    pub mtime: Option<u64>,
    pub audio: bool,
    pub remote: bool,
    pub virtual_entry: bool,
    pub tags_read: bool,
    pub album_id: Option<RowId>,
    pub primary_contributor: Option<RowId>,
    pub sort_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumRow {
    pub id: RowId,
    pub title: String,
    pub title_sort: String,
    pub title_search: String,
    pub disc_no: Option<u32>,
    pub disc_count: Option<u32>,
    pub year: Option<i32>,
    pub compilation: Option<bool>,
    pub artwork: Option<String>,
    pub album_gain: Option<f64>,
    pub album_peak: Option<f64>,
    pub directory: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContributorRow {
    pub id: RowId,
    pub name: String,
    pub name_sort: String,
    pub name_search: String,
    pub musicbrainz_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenreRow {
    pub id: RowId,
    pub name: String,
    pub name_sort: String,
    pub name_search: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContributorTrackRow {
    pub contributor: RowId,
    pub track: RowId,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContributorAlbumRow {
    pub contributor: RowId,
    pub album: RowId,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenreTrackRow {
    pub genre: RowId,
    pub track: RowId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    pub track: RowId,
    pub text: String,
}

/// Strips one leading article ("The Beatles" -> "Beatles").
pub fn strip_leading_article<'a>(value: &'a str, articles: &[String]) -> &'a str {
    let trimmed = value.trim();
    for article in articles {
        let article = article.trim();
        if article.is_empty() {
            continue;
        }
        if trimmed.len() > article.len()
            && trimmed.is_char_boundary(article.len())
            && trimmed[..article.len()].eq_ignore_ascii_case(article)
        {
            let rest = &trimmed[article.len()..];
            if rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    trimmed
}

/// A display-cased sort value: article stripped, whitespace collapsed.
pub fn sort_value(value: &str, articles: &[String]) -> String {
    collapse_whitespace(strip_leading_article(value, articles))
}

/// A case-folded, punctuation-free key used for deduplication and search.
pub fn search_key(value: &str, articles: &[String]) -> String {
    let stripped = strip_leading_article(value, articles);
    let mut out = String::with_capacity(stripped.len());
    let mut last_space = true;
    for ch in stripped.chars() {
        for folded in fold_char(ch) {
            let lowered = folded.to_ascii_lowercase();
            if lowered.is_ascii_alphanumeric() {
                out.push(lowered);
                last_space = false;
            } else if !last_space {
                out.push(' ');
                last_space = true;
            }
        }
    }
    out.trim_end().to_string()
}

fn fold_char(ch: char) -> impl Iterator<Item = char> {
    let lowered = ch.to_lowercase().next().unwrap_or(ch);
    let (a, b) = match lowered {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => ('a', None),
        'ç' => ('c', None),
        'è' | 'é' | 'ê' | 'ë' => ('e', None),
        'ì' | 'í' | 'î' | 'ï' => ('i', None),
        'ñ' => ('n', None),
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'ø' => ('o', None),
        'ù' | 'ú' | 'û' | 'ü' => ('u', None),
        'ý' | 'ÿ' => ('y', None),
        'ß' => ('s', Some('s')),
        'œ' => ('o', Some('e')),
        'æ' => ('a', Some('e')),
        other => (other, None),
    };
    std::iter::once(a).chain(b)
}

pub fn collapse_whitespace(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = true;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim_end().to_string()
}

/// The denormalized library-wide sort key:
/// contributor sort, album sort, disc, zero-padded track, title sort.
pub fn compound_sort_key(
    contributor_sort: &str,
    album_sort: &str,
    disc_no: Option<u32>,
    track_no: Option<u32>,
    title_sort: &str,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);
    if !contributor_sort.is_empty() {
        parts.push(contributor_sort.to_string());
    }
    if !album_sort.is_empty() {
        parts.push(album_sort.to_string());
    }
    if let Some(disc) = disc_no {
        parts.push(disc.to_string());
    }
    if let Some(track) = track_no {
        parts.push(format!("{:03}", track));
    }
    if !title_sort.is_empty() {
        parts.push(title_sort.to_string());
    }
    parts.join(" ")
}

/// True when the URL points outside the local filesystem.
pub fn is_remote_url(url: &str) -> bool {
    match url.find("://") {
        Some(idx) => !url[..idx].eq_ignore_ascii_case("file"),
        None => false,
    }
}

pub fn path_to_url(path: &std::path::Path) -> String {
    let mut out = String::from("file://");
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::RootDir => None,
            other => Some(other.as_os_str().to_string_lossy().to_string()),
        })
        .collect();
    for part in parts {
        out.push('/');
        out.push_str(&part);
    }
    out
}

pub fn url_to_path(url: &str) -> Option<std::path::PathBuf> {
    if is_remote_url(url) {
        return None;
    }
    let raw = url.strip_prefix("file://").unwrap_or(url);
    if raw.is_empty() {
        return None;
    }
    Some(std::path::PathBuf::from(raw))
}

/// The directory component of a URL, used to key the last-track cache.
pub fn url_directory(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) => url[..idx].to_string(),
        None => String::new(),
    }
}

pub fn default_articles() -> Vec<String> {
    DEFAULT_ARTICLES.iter().map(|a| a.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn articles_are_stripped_case_insensitively() {
        let articles = default_articles();
        assert_eq!(strip_leading_article("The Beatles", &articles), "Beatles");
        assert_eq!(strip_leading_article("the beatles", &articles), "beatles");
        assert_eq!(strip_leading_article("Therapy?", &articles), "Therapy?");
        assert_eq!(strip_leading_article("A", &articles), "A");
    }

    #[test]
    fn search_key_folds_case_and_punctuation() {
        let articles = default_articles();
        assert_eq!(search_key("The Beatles", &articles), "beatles");
        assert_eq!(search_key("Sigur Rós", &articles), "sigur ros");
        assert_eq!(search_key("AC/DC", &articles), "ac dc");
        assert_eq!(search_key("  Motörhead!  ", &articles), "motorhead");
    }

    #[test]
    fn sort_value_keeps_display_case() {
        let articles = default_articles();
        assert_eq!(sort_value("The Dark Side", &articles), "Dark Side");
        assert_eq!(sort_value("Abbey  Road", &articles), "Abbey Road");
    }

    #[test]
    fn compound_sort_key_layout() {
        let key = compound_sort_key("Beatles, The", "Abbey Road", None, Some(3), "Come Together");
        assert_eq!(key, "Beatles, The Abbey Road 003 Come Together");
        let key = compound_sort_key("X", "Record", Some(2), Some(12), "Song");
        assert_eq!(key, "X Record 2 012 Song");
        assert_eq!(compound_sort_key("", "", None, None, "Song"), "Song");
    }

    #[test]
    fn url_helpers_round_trip() {
        assert!(is_remote_url("http://example.com/s.mp3"));
        assert!(!is_remote_url("file:///music/a.mp3"));
        assert!(!is_remote_url("/music/a.mp3"));
        let path = std::path::Path::new("/music/a/1.mp3");
        let url = path_to_url(path);
        assert_eq!(url, "file:///music/a/1.mp3");
        assert_eq!(url_to_path(&url).unwrap(), path);
        assert_eq!(url_directory(&url), "file:///music/a");
    }

    #[test]
    fn split_values_handles_delimited_lists() {
        let value = TagValue::One("A; B;C".to_string());
        assert_eq!(value.split_values(), vec!["A", "B", "C"]);
        let value = TagValue::Many(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(value.split_values(), vec!["A", "B"]);
    }
}
