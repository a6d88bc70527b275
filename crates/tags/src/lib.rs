use std::path::Path;

use common::{AttrMap, TagValue};
use lofty::error::LoftyError;
use lofty::prelude::{ItemKey, TaggedFileExt};

#[derive(Debug)]
pub enum TagError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagError::Io(err) => write!(f, "io error: {}", err),
            TagError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for TagError {}

impl From<std::io::Error> for TagError {
    fn from(err: std::io::Error) -> Self {
        TagError::Io(err)
    }
}

impl From<LoftyError> for TagError {
    fn from(err: LoftyError) -> Self {
        TagError::Lofty(err)
    }
}

/// Format-specific tag reading, behind a trait so the catalog can run
/// against a scripted reader in tests.
pub trait TagReader {
    fn read_tags(&self, path: &Path) -> Result<AttrMap, TagError>;
}

/// Reads tags from local audio files with lofty.
#[derive(Debug, Default)]
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read_tags(&self, path: &Path) -> Result<AttrMap, TagError> {
        let tagged_file = lofty::read_from_path(path)?;
        let mut attrs = AttrMap::new();

        let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(tag) => tag,
            None => return Ok(attrs),
        };

        let scalar_keys: [(&str, ItemKey); 18] = [
            ("TITLE", ItemKey::TrackTitle),
            ("TITLESORT", ItemKey::TrackTitleSortOrder),
            ("ALBUM", ItemKey::AlbumTitle),
            ("ALBUMSORT", ItemKey::AlbumTitleSortOrder),
            ("ARTIST", ItemKey::TrackArtist),
            ("ARTISTSORT", ItemKey::TrackArtistSortOrder),
            ("ALBUMARTIST", ItemKey::AlbumArtist),
            ("ALBUMARTISTSORT", ItemKey::AlbumArtistSortOrder),
            ("COMPOSER", ItemKey::Composer),
            ("CONDUCTOR", ItemKey::Conductor),
            ("COMMENT", ItemKey::Comment),
            ("COMPILATION", ItemKey::FlagCompilation),
            ("MUSICBRAINZ_ID", ItemKey::MusicBrainzRecordingId),
            ("MUSICBRAINZ_ARTIST_ID", ItemKey::MusicBrainzArtistId),
            ("REPLAYGAIN_TRACK_GAIN", ItemKey::ReplayGainTrackGain),
            ("REPLAYGAIN_TRACK_PEAK", ItemKey::ReplayGainTrackPeak),
            ("REPLAYGAIN_ALBUM_GAIN", ItemKey::ReplayGainAlbumGain),
            ("REPLAYGAIN_ALBUM_PEAK", ItemKey::ReplayGainAlbumPeak),
        ];
        for (name, key) in scalar_keys {
            if let Some(value) = tag.get_string(&key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    attrs.insert(name.to_string(), TagValue::One(trimmed.to_string()));
                }
            }
        }

        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            let genres: Vec<String> = value
                .split(&[';', ',', '/', '|', '\0'][..])
                .map(|part| part.trim())
                .filter(|part| !part.is_empty())
                .map(|part| part.to_string())
                .collect();
            if genres.len() > 1 {
                attrs.insert("GENRE".to_string(), TagValue::Many(genres));
            } else if !genres.is_empty() {
                attrs.insert("GENRE".to_string(), TagValue::One(genres[0].clone()));
            }
        }

        let numeric_keys: [(&str, ItemKey); 4] = [
            ("TRACKNUM", ItemKey::TrackNumber),
            ("DISC", ItemKey::DiscNumber),
            ("DISCC", ItemKey::DiscTotal),
            ("YEAR", ItemKey::Year),
        ];
        for (name, key) in numeric_keys {
            if let Some(value) = tag.get_string(&key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    attrs.insert(name.to_string(), TagValue::One(trimmed.to_string()));
                }
            }
        }

        Ok(attrs)
    }
}

/// Short content-type codes for the audio formats the server handles.
pub fn audio_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some("mp3"),
        "flac" | "flc" => Some("flc"),
        "ogg" | "oga" => Some("ogg"),
        "opus" => Some("ops"),
        "m4a" | "mp4" | "aac" => Some("mp4"),
        "wav" => Some("wav"),
        "aif" | "aiff" => Some("aif"),
        _ => None,
    }
}

/// Content type for any path: audio code, "dir" for directories,
/// otherwise a guessed MIME essence.
pub fn content_type_for_path(path: &Path) -> String {
    if let Some(audio) = audio_content_type(path) {
        return audio.to_string();
    }
    if path.is_dir() {
        return "dir".to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn is_audio_type(content_type: &str) -> bool {
    matches!(
        content_type,
        "mp3" | "flc" | "ogg" | "ops" | "mp4" | "wav" | "aif"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extensions_map_to_short_codes() {
        assert_eq!(audio_content_type(Path::new("/a/b.mp3")), Some("mp3"));
        assert_eq!(audio_content_type(Path::new("/a/b.FLAC")), Some("flc"));
        assert_eq!(audio_content_type(Path::new("/a/b.txt")), None);
        assert_eq!(audio_content_type(Path::new("/a/b")), None);
    }

    #[test]
    fn audio_codes_are_recognized() {
        assert!(is_audio_type("mp3"));
        assert!(is_audio_type("flc"));
        assert!(!is_audio_type("dir"));
        assert!(!is_audio_type("text/plain"));
    }
}
