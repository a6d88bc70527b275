use common::{default_articles, Role, VARIOUS_ARTISTS};
use serde::{Deserialize, Serialize};

/// Catalog behavior toggles, nested into the server config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogPrefs {
    /// Group multi-disc sets under a single album row instead of one
    /// album per disc.
    pub group_discs: bool,
    /// Generic album titles that only match an existing album when the
    /// primary contributor matches too.
    pub common_album_titles: Vec<String>,
    /// Contributor roles resolved beyond artist and album-artist.
    pub extra_contributor_roles: Vec<Role>,
    /// Leading articles stripped from sort and search values.
    pub articles: Vec<String>,
    pub various_artists_name: String,
    pub query_cache_entries: usize,
    pub query_cache_ttl_secs: u64,
    pub content_type_cache_entries: usize,
    pub content_type_cache_ttl_secs: u64,
    /// Background state machines do substantive work on one tick in
    /// this many.
    pub maintenance_throttle_ticks: u32,
    pub commit_interval_secs: u64,
}

impl Default for CatalogPrefs {
    fn default() -> Self {
        Self {
            group_discs: false,
            common_album_titles: vec![
                "Greatest Hits".to_string(),
                "Best of...".to_string(),
                "Live".to_string(),
            ],
            extra_contributor_roles: vec![Role::Band, Role::Composer, Role::Conductor],
            articles: default_articles(),
            various_artists_name: VARIOUS_ARTISTS.to_string(),
            query_cache_entries: 5,
            query_cache_ttl_secs: 60,
            content_type_cache_entries: 128,
            content_type_cache_ttl_secs: 300,
            maintenance_throttle_ticks: 20,
            commit_interval_secs: 30,
        }
    }
}

impl CatalogPrefs {
    pub fn role_included(&self, role: Role) -> bool {
        matches!(role, Role::Artist | Role::AlbumArtist)
            || self.extra_contributor_roles.contains(&role)
    }

    pub fn is_common_album_title(&self, title: &str) -> bool {
        self.common_album_titles
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(title.trim()))
    }
}
