//! Configuration management for the Daily Wallpaper service.
//!
//! Handles loading, saving, and validating configuration from JSON files.
//! The wallpaper category preference lives here and is read once per
//! auto-wallpaper invocation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/daily-wallpaper/config.json";

/// Ordered category values. The position in this list is the category index
/// sent to the catalog; index 0 means "no category filter".
pub const CATEGORIES: &[&str] = &[
    "all",
    "backgrounds",
    "fashion",
    "nature",
    "science",
    "education",
    "feelings",
    "health",
    "people",
    "religion",
    "places",
    "animals",
    "industry",
    "computer",
    "food",
    "sports",
    "transportation",
    "travel",
    "buildings",
    "business",
    "music",
];

/// Index used when the category preference is unset or unknown
pub const DEFAULT_CATEGORY_INDEX: usize = 0;

/// Map a category preference to its index in [`CATEGORIES`]
pub fn category_index(category: &str) -> usize {
    let category = category.trim();
    CATEGORIES
        .iter()
        .position(|c| c.eq_ignore_ascii_case(category))
        .unwrap_or(DEFAULT_CATEGORY_INDEX)
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Catalog API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Catalog API key
    #[serde(default)]
    pub api_key: String,

    /// Wallpaper category preference (one of [`CATEGORIES`], empty = all)
    #[serde(default)]
    pub category: String,

    /// Rotate the wallpaper automatically
    #[serde(default = "default_true")]
    pub auto_wallpaper: bool,

    /// Minutes between automatic wallpaper changes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_min: u32,

    /// Directory holding the cached favorite images
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Favorites table file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Display width in pixels
    #[serde(default = "default_display_width")]
    pub display_width: u32,

    /// Display height in pixels
    #[serde(default = "default_display_height")]
    pub display_height: u32,

    /// Web server port
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_api_url() -> String {
    "https://pixabay.com/api/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u32 {
    24 * 60
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/lib/daily-wallpaper/cache")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/daily-wallpaper/favorites.json")
}

fn default_display_width() -> u32 {
    1080
}

fn default_display_height() -> u32 {
    1920
}

fn default_web_port() -> u16 {
    8888
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            category: String::new(),
            auto_wallpaper: true,
            refresh_interval_min: default_refresh_interval(),
            cache_dir: default_cache_dir(),
            database_path: default_database_path(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            web_port: default_web_port(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file atomically
    ///
    /// Writes to a temporary file first and renames it over the target, so
    /// an interrupted write never leaves a half-written config behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ConfigError::ReadError(e)
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api_url cannot be empty".to_string(),
            ));
        }

        let category = self.category.trim();
        if !category.is_empty() && !CATEGORIES.iter().any(|c| c.eq_ignore_ascii_case(category)) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown category '{}', expected one of: {}",
                self.category,
                CATEGORIES.join(", ")
            )));
        }

        if self.refresh_interval_min < 15 || self.refresh_interval_min > 7 * 24 * 60 {
            return Err(ConfigError::ValidationError(
                "refresh_interval_min must be between 15 and 10080".to_string(),
            ));
        }

        if self.web_port == 0 {
            return Err(ConfigError::ValidationError(
                "web_port must be greater than 0".to_string(),
            ));
        }

        if self.display_width == 0 || self.display_width > 16384 {
            return Err(ConfigError::ValidationError(
                "display_width must be between 1 and 16384".to_string(),
            ));
        }

        if self.display_height == 0 || self.display_height > 16384 {
            return Err(ConfigError::ValidationError(
                "display_height must be between 1 and 16384".to_string(),
            ));
        }

        Ok(())
    }

    /// Index of the configured category
    pub fn category_index(&self) -> usize {
        category_index(&self.category)
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}
