//! Configuration management for Discraft.
//!
//! The bot reads a single JSON file, by default `~/.discraft/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (DISCRAFT_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `DISCRAFT_BOT_TOKEN` → discord.bot_token
//! - `DISCRAFT_PREFIX` → discord.command_prefix
//! - `DISCRAFT_LANG` → lang.bot_lang
//! - `DISCRAFT_DB_PATH` → store.path
//! - `DISCRAFT_WEB_HOST` → web.host
//! - `DISCRAFT_WEB_PORT` → web.port
//! - `DISCRAFT_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".discraft"),
        |dirs| dirs.home_dir().join(".discraft"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map_or_else(|_| raw.to_string(), |p| p.into_owned()))
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub lang: LangConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults; the bot token must then come from
    /// the environment.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::read(&path)?
        } else {
            tracing::info!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("DISCRAFT_BOT_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Ok(prefix) = std::env::var("DISCRAFT_PREFIX") {
            self.discord.command_prefix = prefix;
        }
        if let Ok(lang) = std::env::var("DISCRAFT_LANG") {
            self.lang.bot_lang = lang;
        }
        if let Ok(path) = std::env::var("DISCRAFT_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(host) = std::env::var("DISCRAFT_WEB_HOST") {
            self.web.host = host;
        }
        if let Ok(port) = std::env::var("DISCRAFT_WEB_PORT") {
            if let Ok(p) = port.parse() {
                self.web.port = p;
            }
        }
        if let Ok(level) = std::env::var("DISCRAFT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }
}

// ============================================================================
// Discord
// ============================================================================

/// Discord bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    #[serde(default)]
    pub bot_token: String,

    /// Text every command must start with, followed by whitespace
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            command_prefix: default_command_prefix(),
        }
    }
}

fn default_command_prefix() -> String {
    "!discraft".into()
}

// ============================================================================
// Languages
// ============================================================================

/// Language files configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LangConfig {
    /// Directory holding `langs.json` and one mapping tree per language
    #[serde(default = "default_lang_dir")]
    pub dir: String,

    /// Language the bot speaks
    #[serde(default = "default_bot_lang")]
    pub bot_lang: String,
}

impl LangConfig {
    pub fn dir_path(&self) -> PathBuf {
        expand_path(&self.dir)
    }
}

impl Default for LangConfig {
    fn default() -> Self {
        Self {
            dir: default_lang_dir(),
            bot_lang: default_bot_lang(),
        }
    }
}

fn default_lang_dir() -> String {
    "./lang".into()
}

fn default_bot_lang() -> String {
    "en_us".into()
}

// ============================================================================
// Store
// ============================================================================

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Upper bound for a single store call
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries for transient failures (busy/locked), never for logical ones
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            timeout_ms: default_store_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

fn default_store_path() -> String {
    "~/.discraft/discraft.db".into()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    1
}

// ============================================================================
// Web
// ============================================================================

/// HTTP callback server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,

    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

fn default_web_host() -> String {
    "0.0.0.0".into()
}

fn default_web_port() -> u16 {
    8080
}

// ============================================================================
// Session cache
// ============================================================================

/// Session cache sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Write-back cadence for cached settings
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Unreferenced entries idle this long are evicted
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,

    /// How often the sweep task runs
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            idle_threshold_ms: default_idle_threshold_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_idle_threshold_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

// ============================================================================
// Linking
// ============================================================================

/// Account linking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Lifetime of an unredeemed link ticket
    #[serde(default = "default_link_ttl_secs")]
    pub ttl_secs: u64,
}

impl LinkConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_link_ttl_secs(),
        }
    }
}

fn default_link_ttl_secs() -> u64 {
    600
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
