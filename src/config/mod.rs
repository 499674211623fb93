//! Configuration for tailburrow.
//!
//! Configuration is read from `~/.config/tailburrow/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::BurrowError;
use crate::fetcher::RetryPolicy;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library directory. Unset until `library init` runs.
    pub library_root: Option<PathBuf>,
    pub e621: E621Config,
    pub furaffinity: FurAffinityConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct E621Config {
    pub base_url: String,
    /// e621 rejects requests without a descriptive user agent.
    pub user_agent: String,
    /// Posts per favorites page (API maximum 320)
    pub page_limit: u32,
    pub request_delay_ms: u64,
}

impl Default for E621Config {
    fn default() -> Self {
        Self {
            base_url: "https://e621.net".to_string(),
            user_agent: format!("tailburrow/{} (favorites archiver)", env!("CARGO_PKG_VERSION")),
            page_limit: 320,
            request_delay_ms: 500,
        }
    }
}

impl E621Config {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FurAffinityConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Favorites pages scanned per run
    pub max_pages: u32,
    pub request_delay_ms: u64,
    pub selectors: FaSelectors,
}

impl Default for FurAffinityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.furaffinity.net".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            max_pages: 50,
            request_delay_ms: 800,
            selectors: FaSelectors::default(),
        }
    }
}

impl FurAffinityConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// CSS selectors for FurAffinity markup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaSelectors {
    /// Submission thumbnails on a favorites page; ids look like `sid-123`
    pub favorite: String,
    pub download: String,
    pub tags: String,
    /// Tried in order until one yields text
    pub artist: Vec<String>,
    pub rating: String,
}

impl Default for FaSelectors {
    fn default() -> Self {
        Self {
            favorite: "figure.t-image".to_string(),
            download: "div.download > a".to_string(),
            tags: "section.tags-row span.tags a".to_string(),
            artist: vec![
                "div.submission-id-sub-container a strong".to_string(),
                "div.submission-id-sub-container a[href*='/user/']".to_string(),
                ".submission-sidebar .user-name".to_string(),
            ],
            rating: "div.rating span".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Consecutive storage failures that end a run
    pub max_consecutive_storage_errors: u32,
    pub trash_retention_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_consecutive_storage_errors: 5,
            trash_retention_days: 30,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/tailburrow/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tailburrow").join("config.toml"))
    }

    /// Writes `library_root` into the config file, keeping its comments.
    pub fn save_library_root(config_path: &Path, root: &Path) -> Result<(), ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        let updated = Self::with_library_root(&content, root);

        fs::write(config_path, updated).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    fn with_library_root(content: &str, root: &Path) -> String {
        let value = toml::Value::String(root.to_string_lossy().into_owned());
        let line = format!("library_root = {}", value);

        let mut lines: Vec<String> = Vec::new();
        let mut replaced = false;
        let mut in_table = false;

        for current in content.lines() {
            let trimmed = current.trim_start();
            if trimmed.starts_with('[') {
                if !replaced {
                    lines.push(line.clone());
                    lines.push(String::new());
                    replaced = true;
                }
                in_table = true;
            }
            let is_root_key = trimmed.starts_with("library_root")
                || trimmed.starts_with("# library_root");
            if !in_table && !replaced && is_root_key {
                lines.push(line.clone());
                replaced = true;
                continue;
            }
            lines.push(current.to_string());
        }

        if !replaced {
            lines.push(line);
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# tailburrow configuration
#
# The library directory holds db/, media/ and cache/. Set it with
# `tailburrow library init <path>` or uncomment the line below.
# library_root = "/path/to/library"

[e621]
base_url = "https://e621.net"

# Posts per favorites page (maximum 320)
page_limit = 320

# Pause between API requests (milliseconds)
request_delay_ms = 500

[furaffinity]
base_url = "https://www.furaffinity.net"

# Favorites pages scanned per run
max_pages = 50

# Pause between page requests (milliseconds)
request_delay_ms = 800

[furaffinity.selectors]
favorite = "figure.t-image"
download = "div.download > a"
tags = "section.tags-row span.tags a"
rating = "div.rating span"

# Tried in order until one yields a name
artist = [
    "div.submission-id-sub-container a strong",
    "div.submission-id-sub-container a[href*='/user/']",
    ".submission-sidebar .user-name",
]

[sync]
# Attempts per download or page request before giving up
retry_attempts = 3

# Backoff base; attempt n waits n times this (milliseconds)
retry_delay_ms = 1000

# Consecutive disk failures that end a run
max_consecutive_storage_errors = 5

# Days a trashed item is kept before `purge` removes it
trash_retention_days = 30
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl From<ConfigError> for BurrowError {
    fn from(e: ConfigError) -> Self {
        BurrowError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert!(config.library_root.is_none());
        assert_eq!(config.e621.page_limit, 320);
        assert_eq!(config.furaffinity.max_pages, 50);
        assert_eq!(config.furaffinity.selectors.artist.len(), 3);
        assert_eq!(config.sync.retry_attempts, 3);
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
library_root = "/srv/art"

[sync]
retry_attempts = 5
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.library_root, Some(PathBuf::from("/srv/art")));
        assert_eq!(config.sync.retry_attempts, 5);
        // Default value
        assert_eq!(config.sync.retry_delay_ms, 1000);
        assert_eq!(config.e621.base_url, "https://e621.net");
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.sync.trash_retention_days, 30);
        assert_eq!(config.furaffinity.request_delay_ms, 800);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.e621.page_limit, 320);
    }

    #[test]
    fn test_save_library_root_keeps_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        Config::load_from(&path).unwrap();

        Config::save_library_root(&path, Path::new("/data/burrow")).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.library_root, Some(PathBuf::from("/data/burrow")));
        assert_eq!(config.furaffinity.max_pages, 50);

        Config::save_library_root(&path, Path::new("/data/other")).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("library_root =").count(), 1);
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.library_root, Some(PathBuf::from("/data/other")));
    }

    #[test]
    fn test_save_library_root_into_bare_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\nretry_attempts = 2\n").unwrap();

        Config::save_library_root(&path, Path::new("/x")).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.library_root, Some(PathBuf::from("/x")));
        assert_eq!(config.sync.retry_attempts, 2);
    }

    #[test]
    fn test_retry_policy() {
        let policy = SyncConfig::default().retry_policy();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }
}
