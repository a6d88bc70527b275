use std::collections::VecDeque;

use common::RowId;
use tracing::{debug, info};

use crate::schedule::{CatalogTask, TaskStatus};
use crate::validity;
use crate::Catalog;

/// Entities removed per invocation during the orphan sweeps. The track
/// sweep stats the filesystem and stays at one per invocation.
const SWEEP_BATCH: usize = 25;

/// Incremental garbage collector: drops tracks whose backing files are
/// gone, then purges contributors, albums and genres left with no
/// track references. Advances one bounded unit of work per tick and is
/// safe to restart from scratch at any point.
pub struct GarbageCollector {
    every: u32,
    ticks: u32,
    stage: Stage,
    removed: usize,
}

enum Stage {
    Start,
    Tracks(VecDeque<RowId>),
    Contributors(VecDeque<RowId>),
    Albums(VecDeque<RowId>),
    Genres(VecDeque<RowId>),
}

impl GarbageCollector {
    /// `every` is the tick divisor: substantive work happens on one
    /// tick in `every`.
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            ticks: 0,
            stage: Stage::Start,
            removed: 0,
        }
    }

    fn sweep_tracks(catalog: &mut Catalog, queue: &mut VecDeque<RowId>) -> usize {
        let mut removed = 0;
        if let Some(id) = queue.pop_front() {
            if let Some(track) = catalog.store.track(id).found() {
                if validity::is_checkable(&track)
                    && validity::check_track(&track) == validity::Validity::Missing
                {
                    debug!(url = %track.url, "backing file gone, dropping track");
                    catalog.remove_track_row(&track);
                    removed += 1;
                }
            }
        }
        removed
    }

    fn sweep_contributors(catalog: &mut Catalog, queue: &mut VecDeque<RowId>) -> usize {
        let mut removed = 0;
        for _ in 0..SWEEP_BATCH {
            let id = match queue.pop_front() {
                Some(id) => id,
                None => break,
            };
            if catalog.store.contributor_track_count(id) == 0
                && catalog.store.delete_contributor(id)
            {
                removed += 1;
            }
        }
        removed
    }

    fn sweep_albums(catalog: &mut Catalog, queue: &mut VecDeque<RowId>) -> usize {
        let mut removed = 0;
        for _ in 0..SWEEP_BATCH {
            let id = match queue.pop_front() {
                Some(id) => id,
                None => break,
            };
            if catalog.store.album_track_count(id) == 0 && catalog.store.delete_album(id) {
                removed += 1;
            }
        }
        removed
    }

    fn sweep_genres(catalog: &mut Catalog, queue: &mut VecDeque<RowId>) -> usize {
        let mut removed = 0;
        for _ in 0..SWEEP_BATCH {
            let id = match queue.pop_front() {
                Some(id) => id,
                None => break,
            };
            if catalog.store.genre_track_count(id) == 0 && catalog.store.delete_genre(id) {
                removed += 1;
            }
        }
        removed
    }
}

impl CatalogTask for GarbageCollector {
    fn name(&self) -> &'static str {
        "gc"
    }

    fn tick(&mut self, catalog: &mut Catalog) -> TaskStatus {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.every != 0 {
            return TaskStatus::Again;
        }

        match &mut self.stage {
            Stage::Start => {
                self.stage = Stage::Tracks(catalog.store.track_ids().into());
            }
            Stage::Tracks(queue) => {
                self.removed += Self::sweep_tracks(catalog, queue);
                if queue.is_empty() {
                    self.stage = Stage::Contributors(catalog.store.contributor_ids().into());
                }
            }
            Stage::Contributors(queue) => {
                self.removed += Self::sweep_contributors(catalog, queue);
                if queue.is_empty() {
                    self.stage = Stage::Albums(catalog.store.album_ids().into());
                }
            }
            Stage::Albums(queue) => {
                self.removed += Self::sweep_albums(catalog, queue);
                if queue.is_empty() {
                    self.stage = Stage::Genres(catalog.store.genre_ids().into());
                }
            }
            Stage::Genres(queue) => {
                self.removed += Self::sweep_genres(catalog, queue);
                if queue.is_empty() {
                    info!(removed = self.removed, "garbage collection finished");
                    if self.removed > 0 {
                        catalog.note_mutation();
                        catalog.force_commit();
                    }
                    return TaskStatus::Done;
                }
            }
        }
        TaskStatus::Again
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{attrs, audio_file, test_catalog};
    use std::fs;

    fn run_to_completion(catalog: &mut Catalog) {
        let mut gc = GarbageCollector::new(1);
        for _ in 0..10_000 {
            if gc.tick(catalog) == TaskStatus::Done {
                return;
            }
        }
        panic!("garbage collector did not converge");
    }

    #[test]
    fn missing_files_and_orphans_are_removed() {
        let (mut catalog, dir) = test_catalog();
        let (path_a, url_a) = audio_file(&dir, "a/1.mp3");
        let (_path_b, url_b) = audio_file(&dir, "b/1.mp3");
        catalog.update_or_create(
            &url_a,
            &attrs(&[
                ("TITLE", "Gone"),
                ("ALBUM", "Doomed"),
                ("ARTIST", "Solo"),
                ("GENRE", "Ambient"),
            ]),
            false,
            false,
        );
        catalog.update_or_create(
            &url_b,
            &attrs(&[
                ("TITLE", "Kept"),
                ("ALBUM", "Staying"),
                ("ARTIST", "Duo"),
                ("GENRE", "Rock"),
            ]),
            false,
            false,
        );

        fs::remove_file(&path_a).unwrap();
        run_to_completion(&mut catalog);

        assert!(catalog.store.track_by_url(&url_a).is_none());
        assert!(catalog.store.track_by_url(&url_b).is_some());
        assert!(catalog.store.contributors().all(|c| c.name != "Solo"));
        assert!(catalog.store.albums().all(|a| a.title != "Doomed"));
        assert!(catalog.store.genres().all(|g| g.name != "Ambient"));
        assert!(catalog.store.contributors().any(|c| c.name == "Duo"));
        assert!(catalog.store.albums().any(|a| a.title == "Staying"));
        assert!(catalog.store.genres().any(|g| g.name == "Rock"));
    }

    #[test]
    fn contributor_dropped_by_an_edit_is_collected() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "Alpha")]),
            false,
            false,
        );
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "Beta")]),
            false,
            false,
        );

        run_to_completion(&mut catalog);

        assert!(catalog.store.contributors().all(|c| c.name != "Alpha"));
        assert!(catalog.store.contributors().any(|c| c.name == "Beta"));
    }

    #[test]
    fn clean_store_converges_without_removals() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "X")]),
            false,
            false,
        );

        run_to_completion(&mut catalog);
        run_to_completion(&mut catalog);

        assert!(catalog.store.track_by_url(&url).is_some());
        assert_eq!(catalog.store.stats().tracks, 1);
    }

    #[test]
    fn throttle_skips_most_ticks() {
        let (mut catalog, _dir) = test_catalog();
        let mut gc = GarbageCollector::new(20);
        for _ in 0..19 {
            assert_eq!(gc.tick(&mut catalog), TaskStatus::Again);
            assert!(matches!(gc.stage, Stage::Start));
        }
        gc.tick(&mut catalog);
        assert!(matches!(gc.stage, Stage::Tracks(_)));
    }

    #[test]
    fn orphaned_placeholders_are_collected_and_recreated_on_demand() {
        let (mut catalog, dir) = test_catalog();
        let (path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Untagged")]), false, false);
        assert!(catalog
            .store
            .contributors()
            .any(|c| c.name == common::UNKNOWN_ARTIST));

        fs::remove_file(&path).unwrap();
        run_to_completion(&mut catalog);
        assert_eq!(catalog.store.stats().contributors, 0);

        let (_path2, url2) = audio_file(&dir, "a/2.mp3");
        catalog.update_or_create(&url2, &attrs(&[("TITLE", "Still untagged")]), false, false);
        let unknowns = catalog
            .store
            .contributors()
            .filter(|c| c.name == common::UNKNOWN_ARTIST)
            .count();
        assert_eq!(unknowns, 1);
    }
}
