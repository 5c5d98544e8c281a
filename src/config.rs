//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml` and loads the backend secrets.
//!     the toml file is optional (defaults apply); the secrets are not.
//!
//! structure:
//!     - ServerConfig: where the dashboard listens.
//!     - SessionsConfig: idle expiry and cap for browser sessions.
//!     - PollingConfig: refresh interval and auto-refresh toggle.
//!     - CacheConfig: series cache ttl.
//!     - SensorsConfig: sensor table, default range, row cap.
//!     - CommunityConfig: comment list sizes.
//!     - BulletinConfig: staff accounts seeded into the member directory.
//!     - Secrets: SUPABASE_URL / SUPABASE_KEY from secrets.toml or the env.
//!
//! ==============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::RANGE_OPTIONS;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub polling: PollingConfig,
    pub cache: CacheConfig,
    pub sensors: SensorsConfig,
    pub community: CommunityConfig,
    pub bulletin: BulletinConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_minutes: u64,
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { idle_minutes: 30, max_sessions: 1000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub auto_refresh: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 30, auto_refresh: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub table: String,
    pub default_hours: u32,
    pub row_limit: usize,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            table: crate::gateway::DEFAULT_READINGS_TABLE.to_string(),
            default_hours: 24,
            row_limit: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommunityConfig {
    pub comment_limit: usize,
    pub preview_limit: usize,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self { comment_limit: crate::comments::DEFAULT_COMMENT_LIMIT, preview_limit: 5 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BulletinConfig {
    pub staff: Vec<StaffAccount>,
}

#[derive(Deserialize, Clone)]
pub struct StaffAccount {
    pub email: String,
    pub name: String,
    pub password: String,
}

impl fmt::Debug for StaffAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaffAccount")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// no timeout when unset
    pub timeout_seconds: Option<u64>,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DashboardConfig = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !RANGE_OPTIONS.contains(&self.sensors.default_hours) {
            bail!(
                "sensors.default_hours must be one of {:?}, got {}",
                RANGE_OPTIONS,
                self.sensors.default_hours
            );
        }
        if self.sensors.row_limit == 0 {
            bail!("sensors.row_limit must be positive");
        }
        if self.polling.interval_seconds == 0 {
            bail!("polling.interval_seconds must be positive");
        }
        if self.sessions.idle_minutes == 0 || self.sessions.max_sessions == 0 {
            bail!("sessions.idle_minutes and sessions.max_sessions must be positive");
        }
        Ok(())
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("dashboard.toml"),
            PathBuf::from("..").join("config").join("dashboard.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!(path = %path.display(), "config loaded");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config");
                    }
                }
            }
        }

        warn!("no config file found, using defaults");
        Self::default()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_seconds)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_minutes * 60)
    }

    /// one-line summary for the startup log
    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind,
            max_sessions = self.sessions.max_sessions,
            poll_seconds = self.polling.interval_seconds,
            auto_refresh = self.polling.auto_refresh,
            cache_ttl_seconds = self.cache.ttl_seconds,
            table = %self.sensors.table,
            default_hours = self.sensors.default_hours,
            row_limit = self.sensors.row_limit,
            "configuration"
        );
    }
}

// ==============================================================================
// secrets
// ==============================================================================

pub const URL_KEY: &str = "SUPABASE_URL";
pub const API_KEY_KEY: &str = "SUPABASE_KEY";
/// overrides the secrets file location
pub const SECRETS_PATH_ENV: &str = "SENSOR_BOARD_SECRETS";

#[derive(Clone)]
pub struct Secrets {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Default)]
struct SecretsFile {
    #[serde(rename = "SUPABASE_URL")]
    url: Option<String>,
    #[serde(rename = "SUPABASE_KEY")]
    api_key: Option<String>,
}

impl Secrets {
    /// secrets file first, then environment overrides; a missing value is fatal
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(SECRETS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("secrets.toml"));

        let file = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read secrets file {}", path.display()))?;
            Some(content)
        } else {
            None
        };

        Self::resolve(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// merges file content with an env lookup; env wins
    pub fn resolve(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let from_file: SecretsFile = match file {
            Some(content) => toml::from_str(content).context("failed to parse secrets file")?,
            None => SecretsFile::default(),
        };

        let pick = |key: &str, fallback: Option<String>| {
            env(key)
                .or(fallback)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{key} is not configured; set it in config/secrets.toml or the environment"))
        };

        Ok(Self {
            url: pick(URL_KEY, from_file.url)?,
            api_key: pick(API_KEY_KEY, from_file.api_key)?,
        })
    }
}
