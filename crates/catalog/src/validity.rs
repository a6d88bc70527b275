use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use common::{url_to_path, TrackRow};

/// Outcome of comparing a cached track against the filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Unchanged,
    Changed,
    Missing,
}

/// Whether a track participates in validity checking at all. Remote
/// tracks, pseudo-entries and non-audio rows are never re-statted.
pub fn is_checkable(track: &TrackRow) -> bool {
    !track.remote && !track.virtual_entry && track.audio
}

/// Compares stored size and mtime against a fresh stat. Partial stored
/// metadata is tolerated: one matching field is enough.
pub fn check_track(track: &TrackRow) -> Validity {
    let path = match url_to_path(&track.url) {
        Some(path) => path,
        None => return Validity::Unchanged,
    };
    let (size, mtime) = match stat_path(&path) {
        Some(stat) => stat,
        None => return Validity::Missing,
    };

    if let Some(stored) = track.file_size {
        if stored != size {
            return Validity::Changed;
        }
    }
    if let (Some(stored), Some(actual)) = (track.mtime, mtime) {
        if stored != actual {
            return Validity::Changed;
        }
    }
    Validity::Unchanged
}

/// Size and modification time for a path, or `None` when it is gone.
pub fn stat_path(path: &Path) -> Option<(u64, Option<u64>)> {
    let meta = fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    Some((meta.len(), mtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::path_to_url;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    fn local_track(path: &Path) -> TrackRow {
        TrackRow {
            url: path_to_url(path),
            audio: true,
            ..TrackRow::default()
        }
    }

    #[test]
    fn matching_stat_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "1.mp3", b"x".repeat(1000).as_slice());
        let (size, mtime) = stat_path(&path).unwrap();

        let mut track = local_track(&path);
        track.file_size = Some(size);
        track.mtime = mtime;
        assert_eq!(check_track(&track), Validity::Unchanged);
    }

    #[test]
    fn size_mismatch_is_changed() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "1.mp3", b"payload");

        let mut track = local_track(&path);
        track.file_size = Some(1);
        assert_eq!(check_track(&track), Validity::Changed);
    }

    #[test]
    fn partial_metadata_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "1.mp3", b"payload");
        let (size, _) = stat_path(&path).unwrap();

        let mut track = local_track(&path);
        track.file_size = Some(size);
        track.mtime = None;
        assert_eq!(check_track(&track), Validity::Unchanged);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.mp3");
        let track = local_track(&path);
        assert_eq!(check_track(&track), Validity::Missing);
    }

    #[test]
    fn remote_tracks_are_not_checkable() {
        let track = TrackRow {
            url: "http://example.com/stream".to_string(),
            remote: true,
            audio: true,
            ..TrackRow::default()
        };
        assert!(!is_checkable(&track));
    }
}
