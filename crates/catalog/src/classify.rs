use std::collections::{BTreeSet, VecDeque};

use common::{search_key, Role, RowId, UNKNOWN_ALBUM};
use tracing::{debug, info};

use crate::schedule::{CatalogTask, TaskStatus};
use crate::Catalog;

/// Incremental compilation scan: one album per substantive tick. An
/// album whose tracks carry differing artist sets, or whose only
/// artist is the Various Artists placeholder, is flagged as a
/// compilation. An explicit album-artist tag on any track exempts the
/// album, since the user already named its artist.
pub struct CompilationClassifier {
    every: u32,
    ticks: u32,
    queue: Option<VecDeque<RowId>>,
    flagged: usize,
}

impl CompilationClassifier {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            ticks: 0,
            queue: None,
            flagged: 0,
        }
    }

    fn classify_album(catalog: &mut Catalog, id: RowId) -> bool {
        let album = match catalog.store.album(id).found() {
            Some(album) => album,
            None => return false,
        };
        if album.title == UNKNOWN_ALBUM
            || catalog.placeholders.unknown_album == Some(id)
            || album.compilation == Some(true)
        {
            return false;
        }

        let tracks = catalog.store.tracks_for_album(id);
        let mut artist_sets: BTreeSet<Vec<RowId>> = BTreeSet::new();
        for track in &tracks {
            let mappings = catalog.store.contributor_tracks_for(track.id);
            if mappings.iter().any(|m| m.role == Role::AlbumArtist) {
                return false;
            }
            let mut artists: Vec<RowId> = mappings
                .iter()
                .filter(|m| m.role == Role::Artist)
                .map(|m| m.contributor)
                .collect();
            artists.sort_unstable();
            artists.dedup();
            artist_sets.insert(artists);
        }

        let compilation = match artist_sets.len() {
            0 => false,
            1 => {
                let only = artist_sets.iter().next().map(Vec::as_slice);
                match only {
                    Some([sole]) => Some(*sole) == Self::various_artists_id(catalog),
                    _ => false,
                }
            }
            _ => true,
        };
        if !compilation {
            return false;
        }

        debug!(album = id, title = %album.title, "flagging compilation");
        let mut flagged = album;
        flagged.compilation = Some(true);
        catalog.store.update_album(flagged);
        catalog.note_mutation();
        true
    }

    /// Looks the placeholder up without creating it; a library that
    /// never produced a Various Artists row has nothing to match.
    fn various_artists_id(catalog: &Catalog) -> Option<RowId> {
        if let Some(id) = catalog.placeholders.various_artists {
            return Some(id);
        }
        let key = search_key(&catalog.prefs.various_artists_name, &catalog.prefs.articles);
        catalog.store.contributor_by_search(&key).map(|c| c.id)
    }
}

impl CatalogTask for CompilationClassifier {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn tick(&mut self, catalog: &mut Catalog) -> TaskStatus {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.every != 0 {
            return TaskStatus::Again;
        }

        let queue = match &mut self.queue {
            Some(queue) => queue,
            None => {
                self.queue = Some(catalog.store.album_ids().into());
                return TaskStatus::Again;
            }
        };
        match queue.pop_front() {
            Some(id) => {
                if Self::classify_album(catalog, id) {
                    self.flagged += 1;
                }
                TaskStatus::Again
            }
            None => {
                info!(flagged = self.flagged, "compilation scan finished");
                TaskStatus::Done
            }
        }
    }
}
