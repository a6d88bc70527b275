use common::{
    collapse_whitespace, compound_sort_key, path_to_url, search_key, sort_value, url_directory,
    url_to_path, AlbumRow, CommentRow, ContributorAlbumRow, ContributorRow, ContributorTrackRow,
    GenreRow, GenreTrackRow, Role, RowId, TrackRow, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_GENRE,
};
use tracing::debug;

use crate::normalize::Deferred;
use crate::Catalog;

/// Entity resolution: turns deferred attributes into Contributor,
/// Album and Genre rows plus their mapping rows. Runs only after the
/// track row exists, so every foreign key it writes is valid.
impl Catalog {
    pub(crate) fn apply_deferred(
        &mut self,
        mut track: TrackRow,
        deferred: &Deferred,
        creating: bool,
    ) -> TrackRow {
        if deferred.musicbrainz_id.is_some() {
            track.musicbrainz_id = deferred.musicbrainz_id.clone();
        }
        if deferred.disc_count.is_some() {
            track.disc_count = deferred.disc_count;
        }

        self.resolve_contributors(&mut track, deferred, creating);
        self.resolve_genres(&track, deferred, creating);
        self.resolve_album(&mut track, deferred, creating);

        for text in &deferred.comments {
            let existing = self.store.comments_for_track(track.id);
            if !existing.iter().any(|c| &c.text == text) {
                self.store.add_comment(CommentRow {
                    track: track.id,
                    text: text.clone(),
                });
            }
        }

        self.refresh_sort_key(&mut track);
        self.store.update_track(track.clone());
        track
    }

    /// Roles are walked in precedence order; the first contributor
    /// found becomes the track's primary contributor.
    fn resolve_contributors(&mut self, track: &mut TrackRow, deferred: &Deferred, creating: bool) {
        let tagged = deferred
            .contributors
            .iter()
            .any(|(role, names)| self.prefs.role_included(*role) && !names.is_empty());
        if !creating {
            if !tagged {
                // A re-scan with no contributor tags keeps the existing
                // credits and primary contributor.
                return;
            }
            // Contributor associations are replaced like genre ones: a
            // changed artist tag drops every prior credit first.
            self.store.clear_contributor_tracks_for(track.id);
        }

        let mut primary: Option<RowId> = None;
        let mut artist_seen = false;
        for (role, names) in &deferred.contributors {
            if !self.prefs.role_included(*role) {
                continue;
            }
            let sort_override = deferred.contributor_sorts.get(role).cloned();
            for name in names {
                let contributor = self.find_or_create_contributor(name, sort_override.as_deref());
                if *role == Role::Artist && !artist_seen {
                    artist_seen = true;
                    self.apply_contributor_musicbrainz(&contributor, deferred);
                }
                self.store.add_contributor_track(ContributorTrackRow {
                    contributor: contributor.id,
                    track: track.id,
                    role: *role,
                });
                if primary.is_none() {
                    primary = Some(contributor.id);
                }
            }
        }

        if primary.is_none() {
            let unknown = self.ensure_unknown_artist();
            // Role filtering can leave a tagged track with no included
            // contributor; it falls back to the placeholder too.
            self.store.add_contributor_track(ContributorTrackRow {
                contributor: unknown,
                track: track.id,
                role: Role::Artist,
            });
            primary = Some(unknown);
        }
        track.primary_contributor = primary;
    }

    /// The artist musicbrainz tag names the track's lead artist, so it
    /// lands on the first Artist-role contributor. First pass wins.
    fn apply_contributor_musicbrainz(&mut self, contributor: &ContributorRow, deferred: &Deferred) {
        let mbid = match deferred.contributor_musicbrainz.as_deref() {
            Some(mbid) => mbid,
            None => return,
        };
        if contributor.musicbrainz_id.is_some() {
            return;
        }
        let mut row = contributor.clone();
        row.musicbrainz_id = Some(mbid.to_string());
        self.store.update_contributor(row);
    }

    /// Genre associations are replaced, never merged: a re-scan that
    /// changes the genre tag drops every prior association first.
    fn resolve_genres(&mut self, track: &TrackRow, deferred: &Deferred, creating: bool) {
        if deferred.genres.is_empty() {
            if creating {
                let unknown = self.ensure_unknown_genre();
                self.store.add_genre_track(GenreTrackRow {
                    genre: unknown,
                    track: track.id,
                });
            }
            return;
        }

        let mut desired: Vec<RowId> = Vec::with_capacity(deferred.genres.len());
        for name in &deferred.genres {
            let genre = self.find_or_create_genre(name);
            if !desired.contains(&genre.id) {
                desired.push(genre.id);
            }
        }
        let current: Vec<RowId> = self
            .store
            .genre_tracks_for(track.id)
            .iter()
            .map(|m| m.genre)
            .collect();
        let mut sorted = desired.clone();
        sorted.sort_unstable();
        if sorted != current {
            self.store.clear_genre_tracks_for(track.id);
            for genre in desired {
                self.store.add_genre_track(GenreTrackRow {
                    genre,
                    track: track.id,
                });
            }
        }
    }

    fn resolve_album(&mut self, track: &mut TrackRow, deferred: &Deferred, creating: bool) {
        if track.remote || !track.audio {
            return;
        }
        let title = match deferred.album.as_deref() {
            Some(title) if !title.trim().is_empty() => title.trim(),
            _ => {
                if creating && track.album_id.is_none() {
                    track.album_id = Some(self.ensure_unknown_album());
                }
                return;
            }
        };

        let mut album = self.match_or_create_album(track, title, deferred);
        self.apply_album_attrs(&mut album, track, deferred);
        track.album_id = Some(album.id);
        self.replace_album_contributors(album.id, track);

        let directory = url_directory(&track.url);
        self.last_track.insert(directory, track.id);
    }

    fn match_or_create_album(
        &mut self,
        track: &TrackRow,
        title: &str,
        deferred: &Deferred,
    ) -> AlbumRow {
        let title_search = search_key(title, &self.prefs.articles);
        // Disc-aware when a disc tag is present, the set is (or may be)
        // multi-disc, and grouping is off.
        let disc_aware = track.disc_no.is_some()
            && !self.prefs.group_discs
            && deferred.disc_count.map_or(true, |count| count > 1);
        let directory = url_directory(&track.url);

        // Fast path: sequential scans lay same-album tracks in the same
        // directory, so the previous track's album usually matches.
        // Known tradeoff: distinct albums sharing a directory can merge
        // here, since neither disc nor compilation state is re-checked.
        if let Some(last_id) = self.last_track.get(&directory) {
            if let Some(last) = self.store.track(last_id).found() {
                if let Some(album) = last.album_id.and_then(|id| self.store.album(id).found()) {
                    if album.title == collapse_whitespace(title)
                        && (!disc_aware || album.disc_no == track.disc_no)
                    {
                        return album;
                    }
                }
            }
        }

        let placeholder = self.placeholders.unknown_album;
        let candidates: Vec<AlbumRow> = self
            .store
            .albums_by_title_search(&title_search)
            .into_iter()
            .filter(|a| Some(a.id) != placeholder && a.title != UNKNOWN_ALBUM)
            .filter(|a| !disc_aware || a.disc_no == track.disc_no)
            .collect();

        let chosen = self.pick_album_candidate(&candidates, track, title, deferred);
        if let Some(album) = chosen {
            if disc_aware && self.album_has_track_conflict(&album, track, &directory) {
                debug!(
                    album = album.id,
                    track = track.track_no,
                    "track number already taken from another directory, creating new album"
                );
            } else {
                return album;
            }
        }

        self.store.create_album(AlbumRow {
            title: collapse_whitespace(title),
            title_search,
            disc_no: if disc_aware { track.disc_no } else { None },
            directory: Some(directory),
            ..AlbumRow::default()
        })
    }

    fn pick_album_candidate(
        &self,
        candidates: &[AlbumRow],
        track: &TrackRow,
        title: &str,
        deferred: &Deferred,
    ) -> Option<AlbumRow> {
        if candidates.is_empty() {
            return None;
        }
        if let Some(raw) = &deferred.compilation {
            let wanted = compilation_flag(raw);
            if let Some(album) = candidates.iter().find(|a| a.compilation == Some(wanted)) {
                return Some(album.clone());
            }
        }
        if self.prefs.is_common_album_title(title) {
            // Generic titles only match when the primary contributor
            // does too, so every "Greatest Hits" stays separate.
            let primary = track.primary_contributor?;
            return candidates
                .iter()
                .find(|a| {
                    self.store
                        .contributor_albums_for(a.id)
                        .iter()
                        .any(|m| m.contributor == primary)
                })
                .cloned();
        }
        candidates.first().cloned()
    }

    /// A matching album that already holds this track number from a
    /// different directory is a different physical album.
    fn album_has_track_conflict(
        &self,
        album: &AlbumRow,
        track: &TrackRow,
        directory: &str,
    ) -> bool {
        let track_no = match track.track_no {
            Some(no) => no,
            None => return false,
        };
        self.store.tracks_for_album(album.id).iter().any(|other| {
            other.id != track.id
                && other.track_no == Some(track_no)
                && url_directory(&other.url) != directory
        })
    }

    fn apply_album_attrs(&mut self, album: &mut AlbumRow, track: &TrackRow, deferred: &Deferred) {
        let sort_source = deferred.album_sort.as_deref().unwrap_or(&album.title);
        album.title_sort = sort_value(sort_source, &self.prefs.articles);
        album.title_search = search_key(&album.title, &self.prefs.articles);

        if let Some(raw) = &deferred.compilation {
            album.compilation = Some(compilation_flag(raw));
        }
        // Disc counts only grow; successive scans of a multi-disc set
        // must never shrink an already-learned count.
        if self.prefs.group_discs || deferred.disc_count.is_some() {
            let grown = [album.disc_count, deferred.disc_count, track.disc_count]
                .into_iter()
                .flatten()
                .max();
            album.disc_count = grown;
        }
        if track.year.is_some() {
            album.year = track.year;
        }
        if deferred.album_gain.is_some() {
            album.album_gain = deferred.album_gain;
        }
        if deferred.album_peak.is_some() {
            album.album_peak = deferred.album_peak;
        }
        if album.artwork.is_none() {
            album.artwork = find_cover_art(&track.url);
        }
        self.store.update_album(album.clone());
    }

    /// ContributorAlbum rows are re-derived wholesale from the album's
    /// current tracks, delete-then-insert, so no stale role survives.
    fn replace_album_contributors(&mut self, album: RowId, current: &TrackRow) {
        let mut rows: Vec<ContributorAlbumRow> = Vec::new();
        let mut member_ids: Vec<RowId> = self
            .store
            .tracks_for_album(album)
            .iter()
            .map(|t| t.id)
            .collect();
        if !member_ids.contains(&current.id) {
            member_ids.push(current.id);
        }
        for track_id in member_ids {
            for mapping in self.store.contributor_tracks_for(track_id) {
                rows.push(ContributorAlbumRow {
                    contributor: mapping.contributor,
                    album,
                    role: mapping.role,
                });
            }
        }
        self.store.replace_contributor_albums(album, rows);
    }

    pub(crate) fn refresh_sort_key(&self, track: &mut TrackRow) {
        let contributor_sort = track
            .primary_contributor
            .and_then(|id| self.store.contributor(id).found())
            .map(|c| c.name_sort)
            .unwrap_or_default();
        let album_sort = track
            .album_id
            .and_then(|id| self.store.album(id).found())
            .map(|a| a.title_sort)
            .unwrap_or_default();
        track.sort_key = compound_sort_key(
            &contributor_sort,
            &album_sort,
            track.disc_no,
            track.track_no,
            &track.title_sort,
        );
    }

    fn find_or_create_contributor(
        &mut self,
        name: &str,
        sort_override: Option<&str>,
    ) -> ContributorRow {
        let name_search = search_key(name, &self.prefs.articles);
        // Dedup is by search key, never by raw string; a later pass
        // with a different sort tag reuses the first row untouched.
        if let Some(existing) = self.store.contributor_by_search(&name_search) {
            return existing;
        }
        let name_sort = match sort_override {
            Some(sort) => sort_value(sort, &self.prefs.articles),
            None => sort_value(name, &self.prefs.articles),
        };
        self.store.create_contributor(ContributorRow {
            name: collapse_whitespace(name),
            name_sort,
            name_search,
            ..ContributorRow::default()
        })
    }

    fn find_or_create_genre(&mut self, name: &str) -> GenreRow {
        let name_search = search_key(name, &self.prefs.articles);
        if let Some(existing) = self.store.genre_by_search(&name_search) {
            return existing;
        }
        self.store.create_genre(GenreRow {
            name: collapse_whitespace(name),
            name_sort: sort_value(name, &self.prefs.articles),
            name_search,
            ..GenreRow::default()
        })
    }

    // Singleton placeholders are store-scoped and lazily created. The
    // cached id is re-verified against the store on every use, since
    // garbage collection may have removed an orphaned placeholder.

    pub(crate) fn ensure_unknown_artist(&mut self) -> RowId {
        if let Some(id) = self.placeholders.unknown_artist {
            if self.store.contributor(id).is_found() {
                return id;
            }
        }
        let id = self.find_or_create_contributor(UNKNOWN_ARTIST, None).id;
        self.placeholders.unknown_artist = Some(id);
        id
    }

    pub(crate) fn ensure_various_artists(&mut self) -> RowId {
        if let Some(id) = self.placeholders.various_artists {
            if self.store.contributor(id).is_found() {
                return id;
            }
        }
        let name = self.prefs.various_artists_name.clone();
        let id = self.find_or_create_contributor(&name, None).id;
        self.placeholders.various_artists = Some(id);
        id
    }

    pub(crate) fn ensure_unknown_genre(&mut self) -> RowId {
        if let Some(id) = self.placeholders.unknown_genre {
            if self.store.genre(id).is_found() {
                return id;
            }
        }
        let id = self.find_or_create_genre(UNKNOWN_GENRE).id;
        self.placeholders.unknown_genre = Some(id);
        id
    }

    /// The album placeholder is found by exact title, not by search
    /// key: once created it must never match the title heuristic.
    pub(crate) fn ensure_unknown_album(&mut self) -> RowId {
        if let Some(id) = self.placeholders.unknown_album {
            if self.store.album(id).is_found() {
                return id;
            }
        }
        let existing = self
            .store
            .albums()
            .find(|a| a.title == UNKNOWN_ALBUM)
            .map(|a| a.id);
        let id = match existing {
            Some(id) => id,
            None => {
                self.store
                    .create_album(AlbumRow {
                        title: UNKNOWN_ALBUM.to_string(),
                        title_sort: UNKNOWN_ALBUM.to_string(),
                        title_search: search_key(UNKNOWN_ALBUM, &self.prefs.articles),
                        ..AlbumRow::default()
                    })
                    .id
            }
        };
        self.placeholders.unknown_album = Some(id);
        id
    }
}

/// First recognised cover image sitting next to the track, as a file
/// URL.
fn find_cover_art(track_url: &str) -> Option<String> {
    const COVER_NAMES: &[&str] = &[
        "cover.jpg",
        "cover.jpeg",
        "cover.png",
        "folder.jpg",
        "folder.jpeg",
        "folder.png",
        "front.jpg",
        "front.jpeg",
        "front.png",
        "album.jpg",
        "album.png",
    ];

    let path = url_to_path(track_url)?;
    let entries = std::fs::read_dir(path.parent()?).ok()?;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if !candidate.is_file() {
            continue;
        }
        let name = match candidate.file_name() {
            Some(name) => name.to_string_lossy().to_ascii_lowercase(),
            None => continue,
        };
        if COVER_NAMES.contains(&name.as_str()) {
            return Some(path_to_url(&candidate));
        }
    }
    None
}

/// Compilation tags are truthy unless they spell out a negative.
fn compilation_flag(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    !matches!(lowered.as_str(), "no" | "0" | "false")
}
