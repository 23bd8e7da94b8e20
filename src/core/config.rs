//! Application settings management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in the recent files list
const MAX_RECENT_FILES: usize = 10;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Trusted application origin, also the URL new windows load
    pub app_url: String,
    /// Recently opened local files, most recent first
    pub recent_files: Vec<PathBuf>,
    /// File watching settings
    pub watch: WatchConfig,
}

/// Which change observer implementation backs a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    /// OS change notifications through `notify`
    #[default]
    Event,
    /// Modification time polling
    Poll,
}

/// File watching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Observer implementation
    pub observer: ObserverKind,
    /// Interval between modification time checks for the poll observer
    pub poll_interval_ms: u64,
    /// Window in which bursts of OS notifications are coalesced
    pub debounce_ms: u64,
    /// Delay before a failed observer is started again
    pub reconnect_backoff_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_url: "https://app.inkbridge.io".to_string(),
            recent_files: Vec::new(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            observer: ObserverKind::Event,
            poll_interval_ms: 5007,
            debounce_ms: 100,
            reconnect_backoff_secs: 10,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl AppConfig {
    /// Get the settings file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("io", "inkbridge", "Inkbridge")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            tracing::warn!("Could not determine config directory, using default settings");
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default settings: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        Ok(config)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;

        tracing::info!("Saved settings to: {}", path.display());
        Ok(())
    }

    /// Add a file to recent files
    pub fn add_recent_file(&mut self, path: PathBuf) {
        self.recent_files.retain(|p| p != &path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(MAX_RECENT_FILES);
    }

    /// Whether an endpoint address belongs to the trusted application origin
    pub fn is_trusted(&self, address: &str) -> bool {
        !self.app_url.is_empty() && address.starts_with(&self.app_url)
    }
}
