use std::path::PathBuf;
use std::time::SystemTime;

use common::{path_to_url, AttrMap};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::state::{AppState, ScanStatus};

/// Walks the music root and reconciles every audio file into the
/// catalog. Runs on a blocking thread; the catalog mutex is taken per
/// file so the serving path stays responsive during long scans.
pub fn start_scan(state: AppState, root: PathBuf, force: bool) {
    *state.scan.write() = ScanStatus::Scanning {
        started: SystemTime::now(),
    };

    tokio::spawn(async move {
        let scan_state = state.clone();
        let result = tokio::task::spawn_blocking(move || run_scan(&scan_state, &root, force)).await;
        match result {
            Ok(Ok(scanned)) => {
                let stats = state.catalog.lock().stats();
                info!(
                    scanned,
                    tracks = stats.tracks,
                    albums = stats.albums,
                    contributors = stats.contributors,
                    "library scan finished"
                );
                *state.scan.write() = ScanStatus::Ready(stats);
            }
            Ok(Err(message)) => {
                warn!(error = %message, "library scan failed");
                *state.scan.write() = ScanStatus::Error(message);
            }
            Err(err) => {
                warn!(error = %err, "scan task panicked");
                *state.scan.write() = ScanStatus::Error(err.to_string());
            }
        }
    });
}

fn run_scan(state: &AppState, root: &PathBuf, force: bool) -> Result<usize, String> {
    if !root.exists() {
        return Err(format!("music root {:?} does not exist", root));
    }
    if force {
        info!("full rescan requested, wiping catalog");
        state.catalog.lock().wipe_all_data();
    }

    let mut scanned = 0usize;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if tags::audio_content_type(path).is_none() {
            continue;
        }
        let url = path_to_url(path);
        let mut catalog = state.catalog.lock();
        if catalog.update_or_create(&url, &AttrMap::new(), true, false).is_some() {
            scanned += 1;
        } else {
            warn!(url, "track failed to reconcile, continuing scan");
        }
    }

    if !state.catalog.lock().force_commit() {
        return Err("commit after scan failed".to_string());
    }
    Ok(scanned)
}
