use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use catalog::CatalogPrefs;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub music_root: String,
    pub db_path: String,
    pub port: u16,
    /// Cooperative scheduler tick interval.
    pub maintenance_tick_ms: u64,
    /// Rest period between maintenance sweeps over the library.
    pub maintenance_rest_secs: u64,
    pub catalog: CatalogPrefs,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: String::new(),
            db_path: "library.redb".to_string(),
            port: 3000,
            maintenance_tick_ms: 100,
            maintenance_rest_secs: 300,
            catalog: CatalogPrefs::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MADRIGAL_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.db_path.trim().is_empty() {
            config.db_path = "library.redb".to_string();
        }
        if config.port == 0 {
            config.port = 3000;
        }
        if config.maintenance_tick_ms == 0 {
            config.maintenance_tick_ms = 100;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_music_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, "library.redb");

        let (reloaded, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded.port, config.port);
    }

    #[test]
    fn zeroed_fields_are_backfilled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 0\nport: 0\ndb_path: \"\"\n").unwrap();
        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, "library.redb");
        assert_eq!(config.version, CONFIG_VERSION);
    }

    #[test]
    fn relative_paths_resolve_next_to_the_config() {
        let config_path = Path::new("/etc/madrigal/config.yaml");
        assert_eq!(
            resolve_path(config_path, "library.redb"),
            PathBuf::from("/etc/madrigal/library.redb")
        );
        assert_eq!(
            resolve_path(config_path, "/var/lib/madrigal.redb"),
            PathBuf::from("/var/lib/madrigal.redb")
        );
        assert!(resolve_music_root(config_path, "  ").is_none());
    }
}
