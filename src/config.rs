//! Configuration loaded from `~/.config/bytewatch/config.toml`.
//!
//! Every section and key is optional; a missing file means defaults. API
//! credentials can also come from `BYTEWATCH_TMDB_TOKEN` and
//! `BYTEWATCH_OMDB_KEY`, which win over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::metadata::omdb::OMDB_API_BASE;
use crate::metadata::tmdb::TMDB_API_BASE;
use crate::stream::cache::CachePolicy;

pub const TMDB_TOKEN_ENV: &str = "BYTEWATCH_TMDB_TOKEN";
pub const OMDB_KEY_ENV: &str = "BYTEWATCH_OMDB_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub browser: BrowserConfig,
    pub extraction: ExtractionConfig,
    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub tmdb_token: Option<String>,
    pub omdb_key: Option<String>,
    pub tmdb_base_url: String,
    pub omdb_base_url: String,
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            tmdb_token: None,
            omdb_key: None,
            tmdb_base_url: TMDB_API_BASE.to_string(),
            omdb_base_url: OMDB_API_BASE.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chromium binary; looked up on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// Remote DevTools endpoint (`http(s)://host:port` or `ws(s)://...`).
    /// When set, no local browser is started.
    pub endpoint: Option<String>,
    pub headless: bool,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            endpoint: None,
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub capture_timeout_secs: u64,
    /// Upper bound for a whole request across all sources. Unset: none.
    pub request_deadline_secs: Option<u64>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            capture_timeout_secs: 10,
            request_deadline_secs: None,
        }
    }
}

impl ExtractionConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub movie_ttl_secs: u64,
    /// Unset: series results are never cached.
    pub series_ttl_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            movie_ttl_secs: 2 * 60 * 60,
            series_ttl_secs: None,
            sweep_interval_secs: 120,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            movie_ttl: Some(Duration::from_secs(self.movie_ttl_secs)),
            series_ttl: self.series_ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Block substrings added to the built-in list.
    pub extra_blocked: Vec<String>,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; an explicitly given path must
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override credentials from the environment; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(token) = non_empty(TMDB_TOKEN_ENV) {
            self.metadata.tmdb_token = Some(token);
        }
        if let Some(key) = non_empty(OMDB_KEY_ENV) {
            self.metadata.omdb_key = Some(key);
        }
    }
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bytewatch")
        .join("config.toml")
}
