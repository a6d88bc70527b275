use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use catalog::{Entity, FindKind, FindQuery, FindSort};
use common::{Role, RowId};
use serde::{Deserialize, Serialize};

use crate::config::resolve_music_root;
use crate::scan::start_scan;
use crate::state::{AppState, ErrorResponse, HealthResponse, ScanStatus};

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tracks", get(list_tracks))
        .route("/tracks/by-url", get(track_by_url))
        .route("/tracks/:track_id", delete(delete_track))
        .route("/albums", get(list_albums))
        .route("/albums/:album_id", get(get_album))
        .route("/albums/:album_id/tracks", get(list_album_tracks))
        .route("/albums/:album_id/contributors", get(list_album_contributors))
        .route("/contributors", get(list_contributors))
        .route("/genres", get(list_genres))
        .route("/rescan", post(rescan))
        .route("/maintenance/commit", post(commit))
        .route("/caches/wipe", post(wipe_caches))
        .with_state(state)
}

fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort: Option<FindSort>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub items: Vec<Entity>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub tracks: usize,
    pub albums: usize,
    pub contributors: usize,
    pub genres: usize,
    pub dirty: bool,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let label = state.scan.read().label();
    let catalog = state.catalog.lock();
    let stats = catalog.stats();
    Json(StatusResponse {
        status: label,
        tracks: stats.tracks,
        albums: stats.albums,
        contributors: stats.contributors,
        genres: stats.genres,
        dirty: catalog.is_dirty(),
    })
}

fn browse(state: &AppState, kind: FindKind, params: &BrowseQuery) -> ListResponse {
    let query = FindQuery {
        kind,
        search: params.search.clone().map(|s| s.to_lowercase()),
        sort: params.sort.unwrap_or(FindSort::SortKey),
        limit: Some(params.limit.unwrap_or(200).max(1)),
        offset: params.offset.unwrap_or(0),
        ..FindQuery::default()
    };
    let mut catalog = state.catalog.lock();
    let total = catalog.count(&query);
    let items = catalog.find(&query).as_ref().clone();
    ListResponse { items, total }
}

async fn list_tracks(
    State(state): State<AppState>,
    Query(params): Query<BrowseQuery>,
) -> Json<ListResponse> {
    Json(browse(&state, FindKind::Track, &params))
}

async fn list_albums(
    State(state): State<AppState>,
    Query(params): Query<BrowseQuery>,
) -> Json<ListResponse> {
    Json(browse(&state, FindKind::Album, &params))
}

async fn list_contributors(
    State(state): State<AppState>,
    Query(params): Query<BrowseQuery>,
) -> Json<ListResponse> {
    Json(browse(&state, FindKind::Contributor, &params))
}

async fn list_genres(
    State(state): State<AppState>,
    Query(params): Query<BrowseQuery>,
) -> Json<ListResponse> {
    Json(browse(&state, FindKind::Genre, &params))
}

async fn get_album(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<RowId>,
) -> JsonResult<Entity> {
    let catalog = state.catalog.lock();
    match catalog.album_by_id(album_id) {
        Some(album) => Ok(Json(Entity::Album(album))),
        None => Err(json_error(StatusCode::NOT_FOUND, "no such album")),
    }
}

async fn list_album_tracks(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<RowId>,
) -> JsonResult<ListResponse> {
    let mut catalog = state.catalog.lock();
    if catalog.album_by_id(album_id).is_none() {
        return Err(json_error(StatusCode::NOT_FOUND, "no such album"));
    }
    let query = FindQuery {
        kind: FindKind::Track,
        album: Some(album_id),
        sort: FindSort::SortKey,
        ..FindQuery::default()
    };
    let items = catalog.find(&query).as_ref().clone();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

#[derive(Serialize)]
pub struct AlbumContributor {
    pub id: RowId,
    pub name: String,
    pub role: Role,
}

async fn list_album_contributors(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<RowId>,
) -> JsonResult<Vec<AlbumContributor>> {
    let catalog = state.catalog.lock();
    if catalog.album_by_id(album_id).is_none() {
        return Err(json_error(StatusCode::NOT_FOUND, "no such album"));
    }
    let contributors = catalog
        .album_contributors(album_id)
        .into_iter()
        .map(|(contributor, role)| AlbumContributor {
            id: contributor.id,
            name: contributor.name,
            role,
        })
        .collect();
    Ok(Json(contributors))
}

#[derive(Deserialize)]
pub struct UrlQuery {
    pub url: String,
    /// Skip the filesystem validity check.
    #[serde(default)]
    pub lightweight: bool,
}

async fn track_by_url(
    State(state): State<AppState>,
    Query(params): Query<UrlQuery>,
) -> JsonResult<Entity> {
    let mut catalog = state.catalog.lock();
    match catalog.object_for_url(&params.url, false, false, params.lightweight) {
        Some(track) => Ok(Json(Entity::Track(track))),
        None => Err(json_error(StatusCode::NOT_FOUND, "no such track")),
    }
}

async fn delete_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<RowId>,
) -> JsonResult<HealthResponse> {
    let mut catalog = state.catalog.lock();
    let track = match catalog.track_by_id(track_id) {
        Some(track) => track,
        None => return Err(json_error(StatusCode::NOT_FOUND, "no such track")),
    };
    catalog.delete(&track.url, false);
    Ok(Json(HealthResponse { status: "ok" }))
}

#[derive(Deserialize)]
pub struct RescanQuery {
    /// Wipe the catalog and rebuild from scratch.
    #[serde(default)]
    pub force: bool,
}

async fn rescan(
    State(state): State<AppState>,
    Query(params): Query<RescanQuery>,
) -> JsonResult<HealthResponse> {
    if matches!(*state.scan.read(), ScanStatus::Scanning { .. }) {
        return Err(json_error(StatusCode::CONFLICT, "scan already running"));
    }
    let root = {
        let config = state.config.read();
        resolve_music_root(&state.config_path, &config.music_root)
    };
    let root = match root {
        Some(root) => root,
        None => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "music_root is not configured",
            ))
        }
    };
    start_scan(state.clone(), root, params.force);
    Ok(Json(HealthResponse { status: "ok" }))
}

async fn commit(State(state): State<AppState>) -> JsonResult<HealthResponse> {
    if state.catalog.lock().force_commit() {
        Ok(Json(HealthResponse { status: "ok" }))
    } else {
        Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "commit failed",
        ))
    }
}

async fn wipe_caches(State(state): State<AppState>) -> Json<HealthResponse> {
    state.catalog.lock().wipe_caches();
    Json(HealthResponse { status: "ok" })
}
