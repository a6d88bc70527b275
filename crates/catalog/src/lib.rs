//! The metadata catalog: reconciliation of tag attributes into
//! normalized track/album/contributor/genre rows, bounded result
//! caching, filesystem staleness handling and background maintenance.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{url_to_path, AlbumRow, AttrMap, ContributorRow, GenreRow, RowId, TrackRow};
use serde::{Deserialize, Serialize};
use store::{Store, StoreError, StoreStats};
use tags::{LoftyReader, TagReader};
use tracing::{debug, error, warn};

mod cache;
mod classify;
mod gc;
mod normalize;
mod prefs;
mod resolve;
mod schedule;
mod validity;

pub use cache::{LastTrackCache, TtlLruCache};
pub use classify::CompilationClassifier;
pub use gc::GarbageCollector;
pub use prefs::CatalogPrefs;
pub use schedule::{CatalogTask, CommitTask, Scheduler, TaskStatus};
pub use validity::Validity;

use normalize::{apply_immediate, normalize_tags};

/// One row in a query result set.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Track(TrackRow),
    Album(AlbumRow),
    Contributor(ContributorRow),
    Genre(GenreRow),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindKind {
    #[default]
    Track,
    Album,
    Contributor,
    Genre,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindSort {
    /// Row id order, the insertion order for a sequential scan.
    #[default]
    Id,
    /// The denormalized compound sort key (tracks) or sort title/name.
    SortKey,
}

/// Query arguments for [`Catalog::find`]. The canonical JSON
/// serialization of this struct is the result-cache key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindQuery {
    pub kind: FindKind,
    /// Substring match against the entity's search key.
    pub search: Option<String>,
    pub album: Option<RowId>,
    pub contributor: Option<RowId>,
    pub genre: Option<RowId>,
    pub sort: FindSort,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Default)]
pub(crate) struct Placeholders {
    pub(crate) unknown_artist: Option<RowId>,
    pub(crate) unknown_album: Option<RowId>,
    pub(crate) unknown_genre: Option<RowId>,
    pub(crate) various_artists: Option<RowId>,
}

/// The metadata store facade. All mutation funnels through one
/// instance; concurrent frontends must serialize access behind a
/// single writer lock.
pub struct Catalog {
    pub(crate) store: Store,
    pub(crate) prefs: CatalogPrefs,
    reader: Box<dyn TagReader + Send>,
    query_cache: TtlLruCache<String, Arc<Vec<Entity>>>,
    content_types: TtlLruCache<String, String>,
    pub(crate) last_track: LastTrackCache,
    pub(crate) placeholders: Placeholders,
    zombies: HashSet<String>,
    dirty: u64,
}

impl Catalog {
    pub fn new(store: Store, prefs: CatalogPrefs, reader: Box<dyn TagReader + Send>) -> Self {
        let query_cache = TtlLruCache::new(
            prefs.query_cache_entries,
            Duration::from_secs(prefs.query_cache_ttl_secs),
        );
        let content_types = TtlLruCache::new(
            prefs.content_type_cache_entries,
            Duration::from_secs(prefs.content_type_cache_ttl_secs),
        );
        Self {
            store,
            prefs,
            reader,
            query_cache,
            content_types,
            last_track: LastTrackCache::new(),
            placeholders: Placeholders::default(),
            zombies: HashSet::new(),
            dirty: 0,
        }
    }

    /// Opens the backing database at `path` with the default tag
    /// reader.
    pub fn open(path: &Path, prefs: CatalogPrefs) -> Result<Self, StoreError> {
        let store = Store::open(path)?;
        Ok(Self::new(store, prefs, Box::new(LoftyReader)))
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn track_by_id(&self, id: RowId) -> Option<TrackRow> {
        self.store.track(id).found()
    }

    pub fn album_by_id(&self, id: RowId) -> Option<AlbumRow> {
        self.store.album(id).found()
    }

    /// Contributors credited on an album, with their roles.
    pub fn album_contributors(&self, album: RowId) -> Vec<(ContributorRow, common::Role)> {
        self.store
            .contributor_albums_for(album)
            .into_iter()
            .filter_map(|m| {
                self.store
                    .contributor(m.contributor)
                    .found()
                    .map(|c| (c, m.role))
            })
            .collect()
    }

    // Serving path

    /// Looks a track up by URL, optionally creating it. Unless
    /// `lightweight`, local audio tracks are validity-checked against
    /// the filesystem first: a changed file is re-derived in place, a
    /// vanished file deletes the row.
    pub fn object_for_url(
        &mut self,
        url: &str,
        create: bool,
        read_tags: bool,
        lightweight: bool,
    ) -> Option<TrackRow> {
        if url.is_empty() {
            error!("object_for_url called with an empty url");
            return None;
        }

        if let Some(track) = self.store.track_by_url(url) {
            if lightweight || !validity::is_checkable(&track) || self.zombies.contains(url) {
                return Some(track);
            }
            return match validity::check_track(&track) {
                Validity::Unchanged => Some(track),
                Validity::Missing => {
                    debug!(url, "backing file vanished, dropping track");
                    self.remove_track_row(&track);
                    None
                }
                Validity::Changed => {
                    debug!(url, "backing file changed, re-deriving");
                    self.discard_associations(&track);
                    self.reconcile(url, Some(track), &AttrMap::new(), true)
                }
            };
        }

        if !create {
            return None;
        }
        if let Some(path) = url_to_path(url) {
            if !path.exists() {
                return None;
            }
        }
        self.reconcile(url, None, &AttrMap::new(), read_tags)
    }

    /// Creates or updates the track for `url` from the supplied
    /// attributes, optionally merged over freshly read file tags.
    /// Returns `None` when reconciliation fails outright; the store is
    /// left as of the last commit and other tracks are unaffected.
    pub fn update_or_create(
        &mut self,
        url: &str,
        attrs: &AttrMap,
        read_tags: bool,
        commit: bool,
    ) -> Option<TrackRow> {
        if url.is_empty() {
            error!("update_or_create called with an empty url");
            return None;
        }
        let existing = self.store.track_by_url(url);
        let track = self.reconcile(url, existing, attrs, read_tags);
        if commit && !self.force_commit() {
            warn!(url, "commit after update failed");
        }
        track
    }

    /// Deletes the track for `url`, cascading its mapping rows. True
    /// when a row was actually removed.
    pub fn delete(&mut self, url: &str, commit: bool) -> bool {
        let track = match self.store.track_by_url(url) {
            Some(track) => track,
            None => return false,
        };
        self.remove_track_row(&track);
        if commit && !self.force_commit() {
            warn!(url, "commit after delete failed");
        }
        true
    }

    /// Unmarks a URL queued for deferred deletion.
    pub fn mark_entry_as_valid(&mut self, url: &str) {
        self.zombies.remove(url);
    }

    /// Queues a URL for deletion at the next forced commit.
    pub fn mark_entry_as_invalid(&mut self, url: &str) {
        self.zombies.insert(url.to_string());
    }

    /// Reconciles the zombie list, then commits pending mutations.
    /// False when the backing store rejected the commit; the pending
    /// state is kept for a later retry.
    pub fn force_commit(&mut self) -> bool {
        let zombies: Vec<String> = self.zombies.drain().collect();
        for url in zombies {
            if let Some(track) = self.store.track_by_url(&url) {
                debug!(url, "deleting zombie entry");
                self.remove_track_row(&track);
            }
        }
        match self.store.commit() {
            Ok(()) => {
                self.dirty = 0;
                self.query_cache.clear();
                true
            }
            Err(err) => {
                error!(error = %err, "commit failed");
                false
            }
        }
    }

    pub fn wipe_caches(&mut self) {
        self.query_cache.clear();
        self.content_types.clear();
        self.last_track.clear();
    }

    /// Drops every row and every cache. The placeholders are
    /// re-created lazily on the next reconciliation.
    pub fn wipe_all_data(&mut self) {
        if let Err(err) = self.store.wipe_all() {
            error!(error = %err, "wiping store failed");
        }
        self.wipe_caches();
        self.placeholders = Placeholders::default();
        self.zombies.clear();
        self.dirty = 0;
    }

    /// Runs a query against the catalog, serving repeats from the
    /// bounded result cache. Returns an empty result on failure.
    pub fn find(&mut self, query: &FindQuery) -> Arc<Vec<Entity>> {
        let key = cache_key(query);
        if let Some(key) = &key {
            if let Some(hit) = self.query_cache.get(key) {
                return hit;
            }
        }
        let mut rows = self.collect(query);
        if query.offset > 0 {
            rows = rows.split_off(rows.len().min(query.offset));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        let rows = Arc::new(rows);
        if let Some(key) = key {
            self.query_cache.insert(key, rows.clone());
        }
        rows
    }

    /// Result count for a query, ignoring limit and offset.
    pub fn count(&mut self, query: &FindQuery) -> usize {
        self.collect(query).len()
    }

    /// Content type for a URL, via the dedicated cache so repeated
    /// lookups touch neither the store nor the filesystem.
    pub fn content_type_for_url(&mut self, url: &str) -> Option<String> {
        if let Some(hit) = self.content_types.get(&url.to_string()) {
            return Some(hit);
        }
        let derived = match self.store.track_by_url(url).and_then(|t| t.content_type) {
            Some(stored) => stored,
            None => tags::content_type_for_path(&url_to_path(url)?),
        };
        self.content_types.insert(url.to_string(), derived.clone());
        Some(derived)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty > 0
    }

    pub fn has_zombies(&self) -> bool {
        !self.zombies.is_empty()
    }

    // Internals

    /// The full reconciliation pipeline: merge read and supplied
    /// attributes, normalize, create or update the row, then resolve
    /// relational entities.
    fn reconcile(
        &mut self,
        url: &str,
        existing: Option<TrackRow>,
        attrs: &AttrMap,
        read_tags: bool,
    ) -> Option<TrackRow> {
        let creating = existing.is_none();
        let mut merged = AttrMap::new();
        if read_tags {
            if let Some(path) = url_to_path(url) {
                match self.reader.read_tags(&path) {
                    Ok(read) => merged.extend(read),
                    // Unreadable tags degrade to a filename-derived
                    // title, never to a failure.
                    Err(err) => warn!(url, error = %err, "reading tags failed"),
                }
            }
        }
        for (key, value) in attrs {
            merged.insert(key.clone(), value.clone());
        }

        let normalized = normalize_tags(&merged, url, creating, &self.prefs);
        let mut track = match existing {
            Some(track) => track,
            None => self.store.create_track(TrackRow {
                url: url.to_string(),
                ..TrackRow::default()
            }),
        };
        apply_immediate(&mut track, &normalized.immediate);
        if !track.remote {
            if let Some(path) = url_to_path(&track.url) {
                if let Some((size, mtime)) = validity::stat_path(&path) {
                    track.file_size = Some(size);
                    track.mtime = mtime;
                }
            }
        }

        let track = self.apply_deferred(track, &normalized.deferred, creating);
        self.content_types.remove(&track.url);
        self.note_mutation();
        Some(track)
    }

    /// Drops a track's derived associations ahead of a re-derivation,
    /// leaving orphan cleanup to garbage collection.
    fn discard_associations(&mut self, track: &TrackRow) {
        self.store.clear_contributor_tracks_for(track.id);
        self.store.clear_genre_tracks_for(track.id);
    }

    pub(crate) fn remove_track_row(&mut self, track: &TrackRow) {
        self.store.delete_track(track.id);
        self.last_track.forget_track(track.id);
        self.content_types.remove(&track.url);
        self.zombies.remove(&track.url);
        self.note_mutation();
    }

    /// Every structural mutation bumps the dirty counter and drops
    /// cached result sets.
    pub(crate) fn note_mutation(&mut self) {
        self.dirty += 1;
        self.query_cache.clear();
    }

    fn collect(&self, query: &FindQuery) -> Vec<Entity> {
        match query.kind {
            FindKind::Track => {
                let mut rows: Vec<TrackRow> = self
                    .store
                    .tracks()
                    .filter(|t| query.album.map_or(true, |id| t.album_id == Some(id)))
                    .filter(|t| {
                        query.contributor.map_or(true, |id| {
                            self.store
                                .contributor_tracks_for(t.id)
                                .iter()
                                .any(|m| m.contributor == id)
                        })
                    })
                    .filter(|t| {
                        query.genre.map_or(true, |id| {
                            self.store
                                .genre_tracks_for(t.id)
                                .iter()
                                .any(|m| m.genre == id)
                        })
                    })
                    .filter(|t| matches_search(&t.title_search, &query.search))
                    .cloned()
                    .collect();
                match query.sort {
                    FindSort::Id => rows.sort_by_key(|t| t.id),
                    FindSort::SortKey => {
                        rows.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then(a.id.cmp(&b.id)))
                    }
                }
                rows.into_iter().map(Entity::Track).collect()
            }
            FindKind::Album => {
                let mut rows: Vec<AlbumRow> = self
                    .store
                    .albums()
                    .filter(|a| {
                        query.contributor.map_or(true, |id| {
                            self.store
                                .contributor_albums_for(a.id)
                                .iter()
                                .any(|m| m.contributor == id)
                        })
                    })
                    .filter(|a| matches_search(&a.title_search, &query.search))
                    .cloned()
                    .collect();
                match query.sort {
                    FindSort::Id => rows.sort_by_key(|a| a.id),
                    FindSort::SortKey => {
                        rows.sort_by(|a, b| a.title_sort.cmp(&b.title_sort).then(a.id.cmp(&b.id)))
                    }
                }
                rows.into_iter().map(Entity::Album).collect()
            }
            FindKind::Contributor => {
                let mut rows: Vec<ContributorRow> = self
                    .store
                    .contributors()
                    .filter(|c| matches_search(&c.name_search, &query.search))
                    .cloned()
                    .collect();
                match query.sort {
                    FindSort::Id => rows.sort_by_key(|c| c.id),
                    FindSort::SortKey => {
                        rows.sort_by(|a, b| a.name_sort.cmp(&b.name_sort).then(a.id.cmp(&b.id)))
                    }
                }
                rows.into_iter().map(Entity::Contributor).collect()
            }
            FindKind::Genre => {
                let mut rows: Vec<GenreRow> = self
                    .store
                    .genres()
                    .filter(|g| matches_search(&g.name_search, &query.search))
                    .cloned()
                    .collect();
                match query.sort {
                    FindSort::Id => rows.sort_by_key(|g| g.id),
                    FindSort::SortKey => {
                        rows.sort_by(|a, b| a.name_sort.cmp(&b.name_sort).then(a.id.cmp(&b.id)))
                    }
                }
                rows.into_iter().map(Entity::Genre).collect()
            }
        }
    }
}

fn matches_search(haystack: &str, needle: &Option<String>) -> bool {
    match needle {
        Some(needle) => haystack.contains(needle.as_str()),
        None => true,
    }
}

/// Canonical cache key: the query's JSON serialization, hashed.
fn cache_key(query: &FindQuery) -> Option<String> {
    match serde_json::to_vec(query) {
        Ok(bytes) => Some(blake3::hash(&bytes).to_hex().to_string()),
        Err(err) => {
            warn!(error = %err, "query not serializable, skipping result cache");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{attrs, audio_file, test_catalog, ScriptedReader};
    use super::*;
    use common::{UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_GENRE};
    use std::fs;

    #[test]
    fn update_or_create_is_idempotent() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        let tags = attrs(&[
            ("TITLE", "Song"),
            ("ALBUM", "Record"),
            ("ARTIST", "X"),
            ("GENRE", "Rock"),
            ("COMMENT", "first rip"),
        ]);

        let first = catalog.update_or_create(&url, &tags, false, false).unwrap();
        let second = catalog.update_or_create(&url, &tags, false, false).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(catalog.stats().tracks, 1);
        assert_eq!(catalog.stats().albums, 1);
        assert_eq!(catalog.stats().contributors, 1);
        assert_eq!(catalog.store.contributor_tracks_for(first.id).len(), 1);
        assert_eq!(catalog.store.genre_tracks_for(first.id).len(), 1);
        assert_eq!(catalog.store.comments_for_track(first.id).len(), 1);
        let album = second.album_id.unwrap();
        assert_eq!(catalog.store.contributor_albums_for(album).len(), 1);
    }

    #[test]
    fn untagged_tracks_share_one_placeholder_each() {
        let (mut catalog, dir) = test_catalog();
        for name in ["a/1.mp3", "a/2.mp3", "b/3.mp3"] {
            let (_path, url) = audio_file(&dir, name);
            catalog.update_or_create(&url, &attrs(&[]), false, false);
        }

        let artists = catalog
            .store
            .contributors()
            .filter(|c| c.name == UNKNOWN_ARTIST)
            .count();
        let albums = catalog
            .store
            .albums()
            .filter(|a| a.title == UNKNOWN_ALBUM)
            .count();
        let genres = catalog
            .store
            .genres()
            .filter(|g| g.name == UNKNOWN_GENRE)
            .count();
        assert_eq!((artists, albums, genres), (1, 1, 1));
        assert_eq!(catalog.stats().contributors, 1);
    }

    #[test]
    fn compound_sort_key_is_stored() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "beatles/3.mp3");
        let track = catalog
            .update_or_create(
                &url,
                &attrs(&[
                    ("TITLE", "Come Together"),
                    ("ALBUM", "Abbey Road"),
                    ("ARTIST", "The Beatles"),
                    ("ARTISTSORT", "Beatles, The"),
                    ("TRACKNUM", "3"),
                ]),
                false,
                false,
            )
            .unwrap();
        assert_eq!(track.sort_key, "Beatles, The Abbey Road 003 Come Together");
    }

    #[test]
    fn changed_file_is_rederived_on_lookup() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, url) = audio_file(&dir, "a/1.mp3");
        let mut reader = ScriptedReader::default();
        reader
            .responses
            .insert(path.clone(), attrs(&[("TITLE", "After")]));
        let store = Store::open(&dir.path().join("library.redb")).unwrap();
        let mut catalog = Catalog::new(store, CatalogPrefs::default(), Box::new(reader));

        catalog.update_or_create(&url, &attrs(&[("TITLE", "Before")]), false, false);
        assert_eq!(
            catalog
                .object_for_url(&url, false, false, false)
                .unwrap()
                .title,
            "Before"
        );

        fs::write(&path, b"rather different payload").unwrap();
        let refreshed = catalog.object_for_url(&url, false, false, false).unwrap();
        assert_eq!(refreshed.title, "After");
    }

    #[test]
    fn vanished_file_is_deleted_on_lookup() {
        let (mut catalog, dir) = test_catalog();
        let (path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Doomed")]), false, false);

        fs::remove_file(&path).unwrap();
        assert!(catalog.object_for_url(&url, false, false, false).is_none());
        assert!(catalog.store.track_by_url(&url).is_none());
    }

    #[test]
    fn lightweight_lookup_skips_validity() {
        let (mut catalog, dir) = test_catalog();
        let (path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Kept")]), false, false);

        fs::remove_file(&path).unwrap();
        assert!(catalog.object_for_url(&url, false, false, true).is_some());
        assert!(catalog.store.track_by_url(&url).is_some());
    }

    #[test]
    fn find_returns_album_with_contributor() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "X")]),
            false,
            false,
        );

        let albums = catalog.find(&FindQuery {
            kind: FindKind::Album,
            ..FindQuery::default()
        });
        assert_eq!(albums.len(), 1);
        let album = match &albums[0] {
            Entity::Album(album) => album.clone(),
            other => panic!("unexpected entity {other:?}"),
        };
        assert_eq!(album.title, "Record");

        let mappings = catalog.store.contributor_albums_for(album.id);
        assert_eq!(mappings.len(), 1);
        let contributor = catalog
            .store
            .contributor(mappings[0].contributor)
            .found()
            .unwrap();
        assert_eq!(contributor.name, "X");
    }

    #[test]
    fn query_cache_is_cleared_by_mutation() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "One")]), false, false);

        let query = FindQuery {
            kind: FindKind::Track,
            ..FindQuery::default()
        };
        assert_eq!(catalog.find(&query).len(), 1);

        let (_path2, url2) = audio_file(&dir, "a/2.mp3");
        catalog.update_or_create(&url2, &attrs(&[("TITLE", "Two")]), false, false);
        assert_eq!(catalog.find(&query).len(), 2);
    }

    #[test]
    fn zombies_are_deleted_at_forced_commit() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Undead")]), false, false);

        catalog.mark_entry_as_invalid(&url);
        assert!(catalog.store.track_by_url(&url).is_some());
        assert!(catalog.force_commit());
        assert!(catalog.store.track_by_url(&url).is_none());
        assert!(!catalog.has_zombies());
    }

    #[test]
    fn marking_valid_cancels_the_zombie() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Spared")]), false, false);

        catalog.mark_entry_as_invalid(&url);
        catalog.mark_entry_as_valid(&url);
        assert!(catalog.force_commit());
        assert!(catalog.store.track_by_url(&url).is_some());
    }

    #[test]
    fn wipe_all_data_resets_placeholders() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Gone")]), false, false);
        assert!(catalog.placeholders.unknown_artist.is_some());

        catalog.wipe_all_data();
        assert_eq!(catalog.stats().tracks, 0);
        assert!(catalog.placeholders.unknown_artist.is_none());
        assert!(!catalog.is_dirty());

        let (_path2, url2) = audio_file(&dir, "a/2.mp3");
        catalog.update_or_create(&url2, &attrs(&[("TITLE", "Fresh")]), false, false);
        assert_eq!(catalog.stats().contributors, 1);
    }

    #[test]
    fn genre_associations_are_replaced_not_merged() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("GENRE", "Rock")]),
            false,
            false,
        );
        let track = catalog
            .update_or_create(
                &url,
                &attrs(&[("TITLE", "Song"), ("GENRE", "Jazz")]),
                false,
                false,
            )
            .unwrap();

        let genres: Vec<String> = catalog
            .store
            .genre_tracks_for(track.id)
            .iter()
            .filter_map(|m| catalog.store.genre(m.genre).found())
            .map(|g| g.name)
            .collect();
        assert_eq!(genres, vec!["Jazz".to_string()]);
    }

    #[test]
    fn contributor_associations_are_replaced_on_artist_edit() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(
            &url,
            &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "Alpha")]),
            false,
            false,
        );
        let track = catalog
            .update_or_create(
                &url,
                &attrs(&[("TITLE", "Song"), ("ALBUM", "Record"), ("ARTIST", "Beta")]),
                false,
                false,
            )
            .unwrap();

        let mappings = catalog.store.contributor_tracks_for(track.id);
        assert_eq!(mappings.len(), 1);
        let beta = catalog
            .store
            .contributor(mappings[0].contributor)
            .found()
            .unwrap();
        assert_eq!(beta.name, "Beta");
        assert_eq!(track.primary_contributor, Some(beta.id));

        // The album credits re-derive from the track; the old artist
        // must not linger there either.
        let credits = catalog.album_contributors(track.album_id.unwrap());
        assert!(credits.iter().any(|(c, _)| c.name == "Beta"));
        assert!(credits.iter().all(|(c, _)| c.name != "Alpha"));

        // A later pass without contributor tags keeps the credits.
        let track = catalog
            .update_or_create(&url, &attrs(&[("TITLE", "Song")]), false, false)
            .unwrap();
        assert_eq!(catalog.store.contributor_tracks_for(track.id).len(), 1);
        assert_eq!(track.primary_contributor, Some(beta.id));
    }

    #[test]
    fn directory_entries_become_virtual_rows() {
        let (mut catalog, dir) = test_catalog();
        let path = dir.path().join("music/albums");
        fs::create_dir_all(&path).unwrap();
        let url = common::path_to_url(&path);

        let track = catalog.object_for_url(&url, true, false, false).unwrap();
        assert!(track.virtual_entry);
        assert!(!track.audio);
        assert_eq!(track.content_type.as_deref(), Some("dir"));

        // Virtual rows are exempt from the file validity check.
        assert!(catalog.object_for_url(&url, false, false, false).is_some());
    }

    #[test]
    fn common_album_titles_split_by_contributor() {
        let (mut catalog, dir) = test_catalog();
        let (_p1, url1) = audio_file(&dir, "a/1.mp3");
        let (_p2, url2) = audio_file(&dir, "b/1.mp3");
        let first = catalog
            .update_or_create(
                &url1,
                &attrs(&[
                    ("TITLE", "Hit"),
                    ("ALBUM", "Greatest Hits"),
                    ("ARTIST", "Abba"),
                ]),
                false,
                false,
            )
            .unwrap();
        let second = catalog
            .update_or_create(
                &url2,
                &attrs(&[
                    ("TITLE", "Other Hit"),
                    ("ALBUM", "Greatest Hits"),
                    ("ARTIST", "Queen"),
                ]),
                false,
                false,
            )
            .unwrap();
        assert_ne!(first.album_id, second.album_id);
    }

    #[test]
    fn same_directory_scan_reuses_the_album() {
        let (mut catalog, dir) = test_catalog();
        let (_p1, url1) = audio_file(&dir, "album/1.mp3");
        let (_p2, url2) = audio_file(&dir, "album/2.mp3");
        let first = catalog
            .update_or_create(
                &url1,
                &attrs(&[("TITLE", "One"), ("ALBUM", "Record"), ("TRACKNUM", "1")]),
                false,
                false,
            )
            .unwrap();
        let second = catalog
            .update_or_create(
                &url2,
                &attrs(&[("TITLE", "Two"), ("ALBUM", "Record"), ("TRACKNUM", "2")]),
                false,
                false,
            )
            .unwrap();
        assert_eq!(first.album_id, second.album_id);
    }

    #[test]
    fn content_type_lookup_is_cached() {
        let (mut catalog, dir) = test_catalog();
        let (_path, url) = audio_file(&dir, "a/1.mp3");
        catalog.update_or_create(&url, &attrs(&[("TITLE", "Song")]), false, false);

        assert_eq!(catalog.content_type_for_url(&url).as_deref(), Some("mp3"));
        catalog.store.delete_track(
            catalog.store.track_by_url(&url).unwrap().id,
        );
        // Served from the cache even though the row is gone.
        assert_eq!(catalog.content_type_for_url(&url).as_deref(), Some("mp3"));
    }

    #[test]
    fn empty_url_degrades_to_absent() {
        let (mut catalog, _dir) = test_catalog();
        assert!(catalog.object_for_url("", true, true, false).is_none());
        assert!(catalog.update_or_create("", &attrs(&[]), false, false).is_none());
    }
}
