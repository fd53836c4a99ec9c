//! # Configuration Module
//!
//! This module handles settings management and data directory setup for Skipper.
//! It provides platform-appropriate data storage locations and ensures necessary
//! directories exist.
//!
//! ## Data Storage
//!
//! Skipper stores its settings and PID file in the platform-standard data directory:
//! - Linux: `~/.local/share/skipper/`
//! - macOS: `~/Library/Application Support/skipper/`
//! - Windows: `%APPDATA%\skipper\`
//!
//! ## Reading Settings
//!
//! Settings are never captured once at startup. Every decision point (a
//! staleness check, a skip decision, a rating write) asks its [`ConfigSource`]
//! for the current values, so `skipper config set ...` takes effect on a
//! running daemon without a restart.

use anyhow::{Result, Context, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Default remote rating service
pub const DEFAULT_API_BASE_URL: &str = "https://api.music.apple.com";

/// Environment override for the developer (bearer) token
pub const DEVELOPER_TOKEN_ENV: &str = "SKIPPER_DEVELOPER_TOKEN";

/// Environment override for the user session token
pub const MUSIC_USER_TOKEN_ENV: &str = "SKIPPER_MUSIC_USER_TOKEN";

/// Keys accepted by [`Settings::set`]
pub const SETTING_KEYS: &[&str] = &[
    "enable_skipping",
    "enable_cache",
    "cache_duration",
    "skip_song_on_dislike",
    "patch_ratings_api",
    "detection_mode",
    "track_id_format",
    "api_base_url",
    "developer_token",
    "music_user_token",
];

/// Returns the platform-appropriate data directory for Skipper
///
/// Creates the `skipper` subdirectory if it doesn't exist yet.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The skipper subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        ))?;

    let skipper_dir = data_dir.join("skipper");
    fs::create_dir_all(&skipper_dir)
        .with_context(|| format!(
            "Failed to create Skipper data directory at {}. Please check file permissions.",
            skipper_dir.display()
        ))?;

    Ok(skipper_dir)
}

/// Returns the path of the settings file (`settings.json` in the data directory)
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// How the daemon turns player events into transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Compare old and new queue positions
    #[default]
    Position,
    /// Compare the now-playing item's queue index with the last one seen
    Identity,
}

/// User-facing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch for automatic skipping
    pub enable_skipping: bool,
    /// Whether cached ratings may be served at all
    pub enable_cache: bool,
    /// Cache lifetime in minutes
    pub cache_duration: u64,
    /// Skip immediately when the playing track gets disliked
    pub skip_song_on_dislike: bool,
    /// Rewrite legacy rating writes to the batched endpoint
    pub patch_ratings_api: bool,
    pub detection_mode: DetectionMode,
    /// `mpc` format that yields a queue item's catalog id
    pub track_id_format: String,
    pub api_base_url: String,
    pub developer_token: Option<String>,
    pub music_user_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_skipping: true,
            enable_cache: true,
            cache_duration: 60,
            skip_song_on_dislike: true,
            patch_ratings_api: false,
            detection_mode: DetectionMode::Position,
            track_id_format: crate::mpd_client::DEFAULT_ID_FORMAT.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            developer_token: None,
            music_user_token: None,
        }
    }
}

impl Settings {
    /// Cache lifetime as a `Duration`
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_duration.saturating_mul(60))
    }

    /// Update a single setting from its CLI representation
    ///
    /// # Errors
    ///
    /// Fails for unknown keys and values that don't parse for the key's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "enable_skipping" => self.enable_skipping = parse_bool(key, value)?,
            "enable_cache" => self.enable_cache = parse_bool(key, value)?,
            "cache_duration" => {
                self.cache_duration = value.trim().parse()
                    .with_context(|| format!("cache_duration must be a whole number of minutes, got '{value}'"))?;
            }
            "skip_song_on_dislike" => self.skip_song_on_dislike = parse_bool(key, value)?,
            "patch_ratings_api" => self.patch_ratings_api = parse_bool(key, value)?,
            "detection_mode" => {
                self.detection_mode = match value.trim() {
                    "position" => DetectionMode::Position,
                    "identity" => DetectionMode::Identity,
                    other => bail!("Invalid detection_mode '{other}'. Use 'position' or 'identity'"),
                };
            }
            "track_id_format" => {
                let format = value.trim();
                if !format.contains('%') {
                    bail!("track_id_format must contain an mpc tag such as %file%");
                }
                self.track_id_format = format.to_string();
            }
            "api_base_url" => {
                let url = value.trim().trim_end_matches('/');
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    bail!("api_base_url must start with http:// or https://");
                }
                self.api_base_url = url.to_string();
            }
            "developer_token" => self.developer_token = non_empty(value),
            "music_user_token" => self.music_user_token = non_empty(value),
            other => bail!("Unknown setting '{other}'"),
        }
        Ok(())
    }

    /// Session credentials if both tokens are present
    pub fn credentials(&self) -> Option<SessionCredentials> {
        match (&self.developer_token, &self.music_user_token) {
            (Some(developer_token), Some(music_user_token)) => Some(SessionCredentials {
                developer_token: developer_token.clone(),
                music_user_token: music_user_token.clone(),
            }),
            _ => None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => bail!("{key} expects true/false, got '{value}'"),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Tokens of the active listening session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub developer_token: String,
    pub music_user_token: String,
}

// Tokens stay out of logs
impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials").finish_non_exhaustive()
    }
}

/// Source of the current settings, consulted at every decision point
pub trait ConfigSource: Send + Sync {
    fn settings(&self) -> Settings;
}

/// Source of the credentials used for rating service calls
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Option<SessionCredentials>;
    fn api_base_url(&self) -> String;
}

/// Settings backed by a JSON file, re-read on every access
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Settings file in the default data directory
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(get_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, defaulting when the file doesn't exist yet
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!("No settings file at {}, using defaults", self.path.display());
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file: {}", self.path.display()))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .context("Failed to serialize settings")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write settings: {}", self.path.display()))
    }

    /// Load, apply one `key = value` change, and save
    pub fn update(&self, key: &str, value: &str) -> Result<Settings> {
        let mut settings = self.load()?;
        settings.set(key, value)?;
        self.save(&settings)?;
        Ok(settings)
    }

    fn load_or_default(&self) -> Settings {
        self.load().unwrap_or_else(|e| {
            warn!("Falling back to default settings: {e:#}");
            Settings::default()
        })
    }
}

impl ConfigSource for SettingsFile {
    fn settings(&self) -> Settings {
        self.load_or_default()
    }
}

impl CredentialSource for SettingsFile {
    fn credentials(&self) -> Option<SessionCredentials> {
        let mut settings = self.load_or_default();
        if let Ok(token) = std::env::var(DEVELOPER_TOKEN_ENV) {
            settings.developer_token = non_empty(&token);
        }
        if let Ok(token) = std::env::var(MUSIC_USER_TOKEN_ENV) {
            settings.music_user_token = non_empty(&token);
        }
        settings.credentials()
    }

    fn api_base_url(&self) -> String {
        self.load_or_default().api_base_url
    }
}

/// In-memory settings shared between components
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<Settings>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut Settings)) {
        let mut settings = self.inner.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut settings);
    }
}

impl ConfigSource for SharedSettings {
    fn settings(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CredentialSource for SharedSettings {
    fn credentials(&self) -> Option<SessionCredentials> {
        self.settings().credentials()
    }

    fn api_base_url(&self) -> String {
        self.settings().api_base_url
    }
}
