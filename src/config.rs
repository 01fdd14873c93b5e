//! Configuration management for pollterm.
//!
//! Settings live in `~/.pollterm/config.toml`. Every field is optional:
//!
//! ```toml
//! server_url = "http://localhost:8080"
//! username = "admin"
//! poll_interval_ms = 1000
//! poll_failure_limit = 5
//! max_log_entries = 200
//!
//! [screen]
//! rows = 24
//! columns = 80
//!
//! [colors]
//! output_fg = 0x00ff00
//! output_bg = 0x000000
//! input_fg = 0xffffff
//! input_bg = 0x000000
//! ```
//!
//! Command line flags override the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::console::DEFAULT_MAX_LOG_ENTRIES;
use crate::core::screen::{Palette, Rgb, ScreenConfig};
use crate::core::session::POLL_FAILURE_LIMIT;

pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config: {0}")]
    Write(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the console server
    pub server_url: String,
    /// Pre-fills the credential prompt
    pub username: Option<String>,
    /// Scheduler tick
    pub poll_interval_ms: u64,
    pub poll_failure_limit: u32,
    pub max_log_entries: usize,
    pub screen: ScreenConfig,
    pub colors: ColorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            username: None,
            poll_interval_ms: 1000,
            poll_failure_limit: POLL_FAILURE_LIMIT,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            screen: ScreenConfig::default(),
            colors: ColorsConfig::default(),
        }
    }
}

/// Default colors, as 0xRRGGBB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    pub output_fg: Rgb,
    pub output_bg: Rgb,
    pub input_fg: Rgb,
    pub input_bg: Rgb,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        let palette = Palette::default();
        Self {
            output_fg: palette.output_fg,
            output_bg: palette.output_bg,
            input_fg: palette.input_fg,
            input_bg: palette.input_bg,
        }
    }
}

impl Config {
    /// Load from `~/.pollterm/config.toml`, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("{}; using defaults", e),
                }
            }
        }
        Self::default()
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Write(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.screen.validate().map_err(ConfigError::Invalid)?;
        Url::parse(&with_scheme(&self.server_url))
            .map_err(|e| ConfigError::Invalid(format!("server_url '{}': {}", self.server_url, e)))?;
        if self.poll_failure_limit == 0 {
            return Err(ConfigError::Invalid(
                "poll_failure_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Tick period, clamped to a sane range
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    pub fn palette(&self) -> Palette {
        Palette {
            output_fg: self.colors.output_fg,
            output_bg: self.colors.output_bg,
            input_fg: self.colors.input_fg,
            input_bg: self.colors.input_bg,
        }
    }

    /// `~/.pollterm/config.toml`
    pub fn get_config_path() -> Option<PathBuf> {
        let dir = data_dir()?;
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// `~/.pollterm`
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".pollterm"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
