mod api;
mod config;
mod maintenance;
mod scan;
mod state;

use std::sync::Arc;

use axum::Router;
use catalog::{Catalog, Scheduler};
use parking_lot::{Mutex, RwLock};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use api::api_router;
use config::{config_path_from_env, load_or_create_config, resolve_music_root, resolve_path};
use maintenance::start_maintenance;
use scan::start_scan;
use state::{AppState, ScanStatus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let db_path = resolve_path(&config_path, &config.db_path);
    let catalog = Catalog::open(&db_path, config.catalog.clone())?;
    let stats = catalog.stats();
    info!(
        tracks = stats.tracks,
        albums = stats.albums,
        contributors = stats.contributors,
        "catalog opened"
    );

    let state = AppState {
        catalog: Arc::new(Mutex::new(catalog)),
        scheduler: Arc::new(Mutex::new(Scheduler::new())),
        scan: Arc::new(RwLock::new(ScanStatus::Unconfigured)),
        config_path,
        config: Arc::new(RwLock::new(config.clone())),
    };

    if stats.tracks > 0 {
        *state.scan.write() = ScanStatus::Ready(stats);
    }
    match resolve_music_root(&state.config_path, &config.music_root) {
        Some(root) if root.exists() => start_scan(state.clone(), root, false),
        Some(root) => {
            warn!(root = %root.display(), "configured music root is missing");
            *state.scan.write() = ScanStatus::Missing(root);
        }
        None => {
            info!("Music directory not configured yet; set music_root in the config.");
        }
    }
    start_maintenance(state.clone());

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush whatever the periodic commit has not caught yet.
    if !state.catalog.lock().force_commit() {
        warn!("final commit failed; uncommitted changes were lost");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
