//! Configuration file parser for ~/.config/stories/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `en_cookie` so the session cookie never reaches
/// logs or error messages.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stories feed endpoint (JSON over GET).
    pub feed_url: String,

    /// Clap submission endpoint (form POST).
    pub clap_url: String,

    /// Block-company endpoint (form POST).
    pub block_url: String,

    /// Session cookie sent as `en_cookie` with every request.
    pub en_cookie: Option<String>,

    /// How long an image story stays on screen.
    pub image_duration_secs: f64,

    /// Duration used for a video whose length the player has not reported.
    pub video_fallback_secs: f64,

    /// Claps allowed per story visit.
    pub max_claps: u32,

    /// Per-request network timeout.
    pub request_timeout_secs: u64,

    /// Number of media blobs kept in memory in front of the disk cache.
    pub memory_cache_entries: usize,

    /// Override for the media cache directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://angel.hirist.com/api7/stories".to_string(),
            clap_url: "https://bidder.hirist.com/api7/story/clap".to_string(),
            block_url: "https://bidder.hirist.com/api7/blockstories".to_string(),
            en_cookie: None,
            image_duration_secs: 5.0,
            video_fallback_secs: 5.0,
            max_claps: 20,
            request_timeout_secs: 30,
            memory_cache_entries: 32,
            cache_dir: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("clap_url", &self.clap_url)
            .field("block_url", &self.block_url)
            .field("en_cookie", &self.en_cookie.as_ref().map(|_| "[REDACTED]"))
            .field("image_duration_secs", &self.image_duration_secs)
            .field("video_fallback_secs", &self.video_fallback_secs)
            .field("max_claps", &self.max_claps)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("memory_cache_entries", &self.memory_cache_entries)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "feed_url",
                "clap_url",
                "block_url",
                "en_cookie",
                "image_duration_secs",
                "video_fallback_secs",
                "max_claps",
                "request_timeout_secs",
                "memory_cache_entries",
                "cache_dir",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), feed_url = %config.feed_url, "Loaded configuration");
        Ok(config)
    }

    /// Image story duration, never shorter than 100ms.
    pub fn image_duration(&self) -> Duration {
        Duration::from_secs_f64(self.image_duration_secs.max(0.1))
    }

    /// Fallback video duration, never shorter than 100ms.
    pub fn video_fallback(&self) -> Duration {
        Duration::from_secs_f64(self.video_fallback_secs.max(0.1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================
