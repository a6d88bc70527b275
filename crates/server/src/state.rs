use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use catalog::{Catalog, Scheduler};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use store::StoreStats;

use crate::config::ServerConfig;

/// Shared server state. The catalog is a single-writer structure, so
/// every access (serving path and maintenance alike) goes through one
/// mutex.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Mutex<Catalog>>,
    pub scheduler: Arc<Mutex<Scheduler>>,
    pub scan: Arc<RwLock<ScanStatus>>,
    pub config_path: PathBuf,
    pub config: Arc<RwLock<ServerConfig>>,
}

#[derive(Clone, Debug)]
pub enum ScanStatus {
    Unconfigured,
    Missing(PathBuf),
    Scanning { started: SystemTime },
    Ready(StoreStats),
    Error(String),
}

impl ScanStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScanStatus::Unconfigured => "unconfigured",
            ScanStatus::Missing(_) => "missing",
            ScanStatus::Scanning { .. } => "scanning",
            ScanStatus::Ready(_) => "ready",
            ScanStatus::Error(_) => "error",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
