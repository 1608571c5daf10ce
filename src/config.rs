//! Daemon configuration
//!
//! Defaults, an optional JSON config file, and environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::CacheError;
use crate::service::client::{DEFAULT_BASE_URL, REQUEST_TIMEOUT};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "FILECACHE_CONFIG";

/// Page cache sizing and eviction policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Files per page
    pub page_size: u32,
    /// Cap on cached entries
    pub max_pages: usize,
    /// Pages fetched ahead by `preload_folder_data`
    pub preload_pages: u32,
    /// Fraction of `max_pages` at which eviction begins
    pub cleanup_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 100,
            preload_pages: 2,
            cleanup_threshold: 0.8,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.page_size == 0 {
            return Err(CacheError::Config("page_size must be greater than zero".to_string()));
        }
        if self.max_pages == 0 {
            return Err(CacheError::Config("max_pages must be greater than zero".to_string()));
        }
        if !(self.cleanup_threshold > 0.0 && self.cleanup_threshold <= 1.0) {
            return Err(CacheError::Config(format!(
                "cleanup_threshold must be in (0, 1], got {}",
                self.cleanup_threshold
            )));
        }
        if self.eviction_limit() == 0 {
            return Err(CacheError::Config(format!(
                "max_pages {} with cleanup_threshold {} leaves no room for entries",
                self.max_pages, self.cleanup_threshold
            )));
        }
        Ok(())
    }

    /// Entry count above which LRU eviction runs
    pub fn eviction_limit(&self) -> usize {
        ((self.max_pages as f64) * self.cleanup_threshold).floor() as usize
    }
}

/// Background preloader pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreloaderConfig {
    /// Folder scheduled when a user session starts
    pub root_folder_id: String,
    /// Pause between two queued folders
    pub item_delay_ms: u64,
    /// Pause before the queue is drained again
    pub rearm_delay_ms: u64,
}

impl Default for PreloaderConfig {
    fn default() -> Self {
        Self {
            root_folder_id: "root".to_string(),
            item_delay_ms: 50,
            rearm_delay_ms: 3000,
        }
    }
}

impl PreloaderConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonConfig {
    /// File service API root
    pub service_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Unix socket the UI connects to
    pub socket_path: PathBuf,
    pub cache: CacheConfig,
    pub preloader: PreloaderConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT.as_secs(),
            socket_path: default_socket_path(),
            cache: CacheConfig::default(),
            preloader: PreloaderConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration: defaults, then the config file if present, then env
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config
            .cache
            .validate()
            .context("Invalid cache configuration")?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply `FILECACHE_*` overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FILECACHE_SERVICE_URL") {
            self.service_url = url;
        }
        if let Some(socket) = lookup("FILECACHE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(size) = lookup("FILECACHE_PAGE_SIZE") {
            self.cache.page_size = size
                .parse()
                .with_context(|| format!("Invalid FILECACHE_PAGE_SIZE: {}", size))?;
        }
        if let Some(pages) = lookup("FILECACHE_MAX_PAGES") {
            self.cache.max_pages = pages
                .parse()
                .with_context(|| format!("Invalid FILECACHE_MAX_PAGES: {}", pages))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Config file location: `$FILECACHE_CONFIG`, else `<config dir>/filecache/config.json`
fn config_file_path() -> Option<PathBuf> {
    env::var(CONFIG_ENV)
        .ok()
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("filecache").join("config.json")))
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("filecache.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_pages, 100);
        assert_eq!(config.preload_pages, 2);
        assert_eq!(config.eviction_limit(), 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = CacheConfig {
            page_size: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let config = CacheConfig {
            cleanup_threshold: 1.5,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"serviceUrl": "http://files.internal/main", "cache": {{"pageSize": 50}}}}"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.service_url, "http://files.internal/main");
        assert_eq!(config.cache.page_size, 50);
        // Unspecified fields keep their defaults
        assert_eq!(config.cache.max_pages, 100);
        assert_eq!(config.preloader.rearm_delay_ms, 3000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FILECACHE_SERVICE_URL", "http://other/main"),
            ("FILECACHE_MAX_PAGES", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = DaemonConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.service_url, "http://other/main");
        assert_eq!(config.cache.max_pages, 10);
        assert_eq!(config.cache.eviction_limit(), 8);

        let mut config = DaemonConfig::default();
        let err = config.apply_env(|key| {
            (key == "FILECACHE_PAGE_SIZE").then(|| "twenty".to_string())
        });
        assert!(err.is_err());
    }
}
