use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{
    AlbumRow, CommentRow, ContributorAlbumRow, ContributorRow, ContributorTrackRow, EntityKind,
    GenreRow, GenreTrackRow, Role, RowId, TrackRow,
};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SCHEMA_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
const ALBUMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");
const CONTRIBUTORS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("contributors");
const GENRES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("genres");
const CONTRIBUTOR_TRACKS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("contributor_tracks");
const CONTRIBUTOR_ALBUMS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("contributor_albums");
const GENRE_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("genre_tracks");
const COMMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("comments");

const META_VERSION_KEY: &str = "version";
const META_NEXT_ID_KEY: &str = "next_id";

/// Tagged retrieval result; `Deleted` reports ids consumed by a delete
/// since the store was opened.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetch<T> {
    Found(T),
    Absent,
    Deleted,
}

impl<T> Fetch<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Fetch::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Fetch::Found(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub tracks: usize,
    pub albums: usize,
    pub contributors: usize,
    pub genres: usize,
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "io error: {}", err),
            StoreError::Redb(err) => write!(f, "db error: {}", err),
            StoreError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Redb(err)
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<CommitError> for StoreError {
    fn from(err: CommitError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StoreError::Bincode(err)
    }
}

/// Typed row storage with an explicit commit boundary.
///
/// Rows live in memory between commits; `commit()` persists the whole
/// catalog to redb in one write transaction. The in-memory state is
/// canonical until then, so an interrupted process falls back to the
/// last committed snapshot.
pub struct Store {
    db: Arc<Database>,
    next_id: RowId,
    tracks: HashMap<RowId, TrackRow>,
    track_ids_by_url: HashMap<String, RowId>,
    albums: HashMap<RowId, AlbumRow>,
    contributors: HashMap<RowId, ContributorRow>,
    genres: HashMap<RowId, GenreRow>,
    contributor_tracks: HashSet<ContributorTrackRow>,
    contributor_albums: HashSet<ContributorAlbumRow>,
    genre_tracks: HashSet<GenreTrackRow>,
    comments: Vec<CommentRow>,
    deleted: HashSet<(EntityKind, RowId)>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        let mut store = Self {
            db: Arc::new(db),
            next_id: 1,
            tracks: HashMap::new(),
            track_ids_by_url: HashMap::new(),
            albums: HashMap::new(),
            contributors: HashMap::new(),
            genres: HashMap::new(),
            contributor_tracks: HashSet::new(),
            contributor_albums: HashSet::new(),
            genre_tracks: HashSet::new(),
            comments: Vec::new(),
            deleted: HashSet::new(),
        };

        match store.read_version()? {
            Some(version) if version == SCHEMA_VERSION => store.load()?,
            Some(version) => {
                warn!("Catalog schema version mismatch ({}); starting empty", version);
            }
            None => {}
        }

        Ok(store)
    }

    fn read_version(&self) -> Result<Option<u32>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let read_txn = self.db.begin_read()?;

        {
            let table = read_txn.open_table(META_TABLE)?;
            let next_id = table.get(META_NEXT_ID_KEY)?;
            if let Some(value) = next_id {
                self.next_id = decode_value(value.value())?;
            }
        }

        let table = read_txn.open_table(TRACKS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: TrackRow = decode_value(entry.1.value())?;
            self.track_ids_by_url.insert(row.url.clone(), row.id);
            self.tracks.insert(row.id, row);
        }

        let table = read_txn.open_table(ALBUMS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: AlbumRow = decode_value(entry.1.value())?;
            self.albums.insert(row.id, row);
        }

        let table = read_txn.open_table(CONTRIBUTORS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: ContributorRow = decode_value(entry.1.value())?;
            self.contributors.insert(row.id, row);
        }

        let table = read_txn.open_table(GENRES_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: GenreRow = decode_value(entry.1.value())?;
            self.genres.insert(row.id, row);
        }

        let table = read_txn.open_table(CONTRIBUTOR_TRACKS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: ContributorTrackRow = decode_value(entry.1.value())?;
            self.contributor_tracks.insert(row);
        }

        let table = read_txn.open_table(CONTRIBUTOR_ALBUMS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: ContributorAlbumRow = decode_value(entry.1.value())?;
            self.contributor_albums.insert(row);
        }

        let table = read_txn.open_table(GENRE_TRACKS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: GenreTrackRow = decode_value(entry.1.value())?;
            self.genre_tracks.insert(row);
        }

        let table = read_txn.open_table(COMMENTS_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            let row: CommentRow = decode_value(entry.1.value())?;
            self.comments.push(row);
        }

        Ok(())
    }

    fn allocate_id(&mut self) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            tracks: self.tracks.len(),
            albums: self.albums.len(),
            contributors: self.contributors.len(),
            genres: self.genres.len(),
        }
    }

    // Tracks

    pub fn create_track(&mut self, mut row: TrackRow) -> TrackRow {
        row.id = self.allocate_id();
        self.track_ids_by_url.insert(row.url.clone(), row.id);
        self.tracks.insert(row.id, row.clone());
        row
    }

    pub fn track(&self, id: RowId) -> Fetch<TrackRow> {
        match self.tracks.get(&id) {
            Some(row) => Fetch::Found(row.clone()),
            None if self.deleted.contains(&(EntityKind::Track, id)) => Fetch::Deleted,
            None => Fetch::Absent,
        }
    }

    pub fn track_by_url(&self, url: &str) -> Option<TrackRow> {
        self.track_ids_by_url
            .get(url)
            .and_then(|id| self.tracks.get(id))
            .cloned()
    }

    pub fn update_track(&mut self, row: TrackRow) {
        if let Some(old) = self.tracks.get(&row.id) {
            if old.url != row.url {
                self.track_ids_by_url.remove(&old.url);
                self.track_ids_by_url.insert(row.url.clone(), row.id);
            }
        }
        self.tracks.insert(row.id, row);
    }

    /// Removes a track and all its mapping rows and comments.
    pub fn delete_track(&mut self, id: RowId) -> bool {
        let row = match self.tracks.remove(&id) {
            Some(row) => row,
            None => return false,
        };
        self.track_ids_by_url.remove(&row.url);
        self.contributor_tracks.retain(|m| m.track != id);
        self.genre_tracks.retain(|m| m.track != id);
        self.comments.retain(|c| c.track != id);
        self.deleted.insert((EntityKind::Track, id));
        true
    }

    pub fn track_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.tracks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackRow> {
        self.tracks.values()
    }

    pub fn tracks_for_album(&self, album: RowId) -> Vec<TrackRow> {
        let mut tracks: Vec<TrackRow> = self
            .tracks
            .values()
            .filter(|t| t.album_id == Some(album))
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    pub fn album_track_count(&self, album: RowId) -> usize {
        self.tracks
            .values()
            .filter(|t| t.album_id == Some(album))
            .count()
    }

    // Albums

    pub fn create_album(&mut self, mut row: AlbumRow) -> AlbumRow {
        row.id = self.allocate_id();
        self.albums.insert(row.id, row.clone());
        row
    }

    pub fn album(&self, id: RowId) -> Fetch<AlbumRow> {
        match self.albums.get(&id) {
            Some(row) => Fetch::Found(row.clone()),
            None if self.deleted.contains(&(EntityKind::Album, id)) => Fetch::Deleted,
            None => Fetch::Absent,
        }
    }

    pub fn update_album(&mut self, row: AlbumRow) {
        self.albums.insert(row.id, row);
    }

    pub fn delete_album(&mut self, id: RowId) -> bool {
        if self.albums.remove(&id).is_none() {
            return false;
        }
        self.contributor_albums.retain(|m| m.album != id);
        for track in self.tracks.values_mut() {
            if track.album_id == Some(id) {
                track.album_id = None;
            }
        }
        self.deleted.insert((EntityKind::Album, id));
        true
    }

    pub fn album_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.albums.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn albums(&self) -> impl Iterator<Item = &AlbumRow> {
        self.albums.values()
    }

    pub fn albums_by_title_search(&self, title_search: &str) -> Vec<AlbumRow> {
        let mut rows: Vec<AlbumRow> = self
            .albums
            .values()
            .filter(|a| a.title_search == title_search)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    // Contributors

    pub fn create_contributor(&mut self, mut row: ContributorRow) -> ContributorRow {
        row.id = self.allocate_id();
        self.contributors.insert(row.id, row.clone());
        row
    }

    pub fn contributor(&self, id: RowId) -> Fetch<ContributorRow> {
        match self.contributors.get(&id) {
            Some(row) => Fetch::Found(row.clone()),
            None if self.deleted.contains(&(EntityKind::Contributor, id)) => Fetch::Deleted,
            None => Fetch::Absent,
        }
    }

    pub fn update_contributor(&mut self, row: ContributorRow) {
        self.contributors.insert(row.id, row);
    }

    pub fn delete_contributor(&mut self, id: RowId) -> bool {
        if self.contributors.remove(&id).is_none() {
            return false;
        }
        self.contributor_tracks.retain(|m| m.contributor != id);
        self.contributor_albums.retain(|m| m.contributor != id);
        for track in self.tracks.values_mut() {
            if track.primary_contributor == Some(id) {
                track.primary_contributor = None;
            }
        }
        self.deleted.insert((EntityKind::Contributor, id));
        true
    }

    pub fn contributor_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.contributors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contributors(&self) -> impl Iterator<Item = &ContributorRow> {
        self.contributors.values()
    }

    pub fn contributor_by_search(&self, name_search: &str) -> Option<ContributorRow> {
        let mut rows: Vec<&ContributorRow> = self
            .contributors
            .values()
            .filter(|c| c.name_search == name_search)
            .collect();
        rows.sort_by_key(|c| c.id);
        rows.first().map(|c| (*c).clone())
    }

    // Genres

    pub fn create_genre(&mut self, mut row: GenreRow) -> GenreRow {
        row.id = self.allocate_id();
        self.genres.insert(row.id, row.clone());
        row
    }

    pub fn genre(&self, id: RowId) -> Fetch<GenreRow> {
        match self.genres.get(&id) {
            Some(row) => Fetch::Found(row.clone()),
            None if self.deleted.contains(&(EntityKind::Genre, id)) => Fetch::Deleted,
            None => Fetch::Absent,
        }
    }

    pub fn delete_genre(&mut self, id: RowId) -> bool {
        if self.genres.remove(&id).is_none() {
            return false;
        }
        self.genre_tracks.retain(|m| m.genre != id);
        self.deleted.insert((EntityKind::Genre, id));
        true
    }

    pub fn genre_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.genres.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn genres(&self) -> impl Iterator<Item = &GenreRow> {
        self.genres.values()
    }

    pub fn genre_by_search(&self, name_search: &str) -> Option<GenreRow> {
        let mut rows: Vec<&GenreRow> = self
            .genres
            .values()
            .filter(|g| g.name_search == name_search)
            .collect();
        rows.sort_by_key(|g| g.id);
        rows.first().map(|g| (*g).clone())
    }

    // Mapping rows

    /// Inserts a contributor/track/role mapping; false when it already
    /// existed.
    pub fn add_contributor_track(&mut self, row: ContributorTrackRow) -> bool {
        self.contributor_tracks.insert(row)
    }

    pub fn contributor_tracks_for(&self, track: RowId) -> Vec<ContributorTrackRow> {
        let mut rows: Vec<ContributorTrackRow> = self
            .contributor_tracks
            .iter()
            .filter(|m| m.track == track)
            .copied()
            .collect();
        rows.sort();
        rows
    }

    pub fn clear_contributor_tracks_for(&mut self, track: RowId) {
        self.contributor_tracks.retain(|m| m.track != track);
    }

    pub fn contributor_track_count(&self, contributor: RowId) -> usize {
        self.contributor_tracks
            .iter()
            .filter(|m| m.contributor == contributor)
            .count()
    }

    /// Replaces every contributor mapping for an album
    /// (delete-then-insert, so stale role rows never survive an update).
    pub fn replace_contributor_albums(&mut self, album: RowId, rows: Vec<ContributorAlbumRow>) {
        self.contributor_albums.retain(|m| m.album != album);
        for row in rows {
            debug_assert_eq!(row.album, album);
            self.contributor_albums.insert(row);
        }
    }

    pub fn contributor_albums_for(&self, album: RowId) -> Vec<ContributorAlbumRow> {
        let mut rows: Vec<ContributorAlbumRow> = self
            .contributor_albums
            .iter()
            .filter(|m| m.album == album)
            .copied()
            .collect();
        rows.sort();
        rows
    }

    pub fn add_genre_track(&mut self, row: GenreTrackRow) -> bool {
        self.genre_tracks.insert(row)
    }

    pub fn clear_genre_tracks_for(&mut self, track: RowId) {
        self.genre_tracks.retain(|m| m.track != track);
    }

    pub fn genre_tracks_for(&self, track: RowId) -> Vec<GenreTrackRow> {
        let mut rows: Vec<GenreTrackRow> = self
            .genre_tracks
            .iter()
            .filter(|m| m.track == track)
            .copied()
            .collect();
        rows.sort_by_key(|m| (m.genre, m.track));
        rows
    }

    pub fn genre_track_count(&self, genre: RowId) -> usize {
        self.genre_tracks.iter().filter(|m| m.genre == genre).count()
    }

    pub fn add_comment(&mut self, row: CommentRow) {
        self.comments.push(row);
    }

    pub fn comments_for_track(&self, track: RowId) -> Vec<CommentRow> {
        self.comments
            .iter()
            .filter(|c| c.track == track)
            .cloned()
            .collect()
    }

    // Commit boundary

    /// Persists the whole catalog in one transaction: clear every
    /// table, rewrite from memory.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;

        clear_table(&write_txn, META_TABLE)?;
        clear_u64_table(&write_txn, TRACKS_TABLE)?;
        clear_u64_table(&write_txn, ALBUMS_TABLE)?;
        clear_u64_table(&write_txn, CONTRIBUTORS_TABLE)?;
        clear_u64_table(&write_txn, GENRES_TABLE)?;
        clear_table(&write_txn, CONTRIBUTOR_TRACKS_TABLE)?;
        clear_table(&write_txn, CONTRIBUTOR_ALBUMS_TABLE)?;
        clear_table(&write_txn, GENRE_TRACKS_TABLE)?;
        clear_table(&write_txn, COMMENTS_TABLE)?;

        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(META_VERSION_KEY, encode_value(&SCHEMA_VERSION)?.as_slice())?;
            table.insert(META_NEXT_ID_KEY, encode_value(&self.next_id)?.as_slice())?;

            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            for (id, row) in &self.tracks {
                table.insert(id, encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(ALBUMS_TABLE)?;
            for (id, row) in &self.albums {
                table.insert(id, encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(CONTRIBUTORS_TABLE)?;
            for (id, row) in &self.contributors {
                table.insert(id, encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(GENRES_TABLE)?;
            for (id, row) in &self.genres {
                table.insert(id, encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(CONTRIBUTOR_TRACKS_TABLE)?;
            for row in &self.contributor_tracks {
                let key = key3(row.contributor, row.track, row.role.as_u8());
                table.insert(key.as_str(), encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(CONTRIBUTOR_ALBUMS_TABLE)?;
            for row in &self.contributor_albums {
                let key = key3(row.contributor, row.album, row.role.as_u8());
                table.insert(key.as_str(), encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(GENRE_TRACKS_TABLE)?;
            for row in &self.genre_tracks {
                let key = key2(row.genre, row.track);
                table.insert(key.as_str(), encode_value(row)?.as_slice())?;
            }

            let mut table = write_txn.open_table(COMMENTS_TABLE)?;
            for (seq, row) in self.comments.iter().enumerate() {
                let key = key2(row.track, seq as u64);
                table.insert(key.as_str(), encode_value(row)?.as_slice())?;
            }
        }

        write_txn.commit()?;
        Ok(())
    }

    /// Drops every row, in memory and on disk.
    pub fn wipe_all(&mut self) -> Result<(), StoreError> {
        self.tracks.clear();
        self.track_ids_by_url.clear();
        self.albums.clear();
        self.contributors.clear();
        self.genres.clear();
        self.contributor_tracks.clear();
        self.contributor_albums.clear();
        self.genre_tracks.clear();
        self.comments.clear();
        self.deleted.clear();
        self.next_id = 1;
        self.commit()
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), StoreError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn clear_u64_table(
    txn: &WriteTransaction,
    table: TableDefinition<u64, &[u8]>,
) -> Result<(), StoreError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn key2(a: u64, b: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:016x}", a));
    out.push(KEY_SEP);
    out.push_str(&format!("{:016x}", b));
    out
}

fn key3(a: u64, b: u64, c: u8) -> String {
    let mut out = key2(a, b);
    out.push(KEY_SEP);
    out.push_str(&format!("{:02x}", c));
    out
}
