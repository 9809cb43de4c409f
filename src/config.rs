//! Runtime configuration loaded from the environment.
//!
//! SYSTEM CONTEXT
//! ==============
//! `main` calls [`AppConfig::from_env`] once at startup (after `.env` has been
//! loaded by `dotenvy`). Everything else receives the parsed config through
//! `AppState`, so no module reads process env on the request path.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_STORAGE_DIR: &str = "storage";
/// 20 MiB.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_TOKEN_TTL_HOURS: u64 = 24 * 30;
const DEFAULT_WS_TICKET_TTL_SECS: u64 = 60;
/// Ten years. Longer TTLs push token expiry past what timestamps can hold.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{key}={value} is out of range")]
    OutOfRange { key: &'static str, value: u64 },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Root directory for the local attachment store.
    pub storage_dir: PathBuf,
    pub max_attachment_bytes: usize,
    pub token_ttl: Duration,
    pub ws_ticket_ttl: Duration,
    /// When set, only current members may subscribe to a chatroom channel.
    pub channel_require_membership: bool,
}

impl AppConfig {
    /// Build the config from process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset, or
    /// [`ConfigError::OutOfRange`] if a TTL exceeds ten years.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            port: env_parse("PORT", DEFAULT_PORT),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            storage_dir: std::env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR)),
            max_attachment_bytes: env_parse("MAX_ATTACHMENT_BYTES", DEFAULT_MAX_ATTACHMENT_BYTES),
            token_ttl: env_ttl("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS, 3600)?,
            ws_ticket_ttl: env_ttl("WS_TICKET_TTL_SECS", DEFAULT_WS_TICKET_TTL_SECS, 1)?,
            channel_require_membership: env_bool("CHANNEL_REQUIRE_MEMBERSHIP").unwrap_or(false),
        })
    }

    /// Defaults for everything, with a caller-supplied database URL.
    #[must_use]
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: DEFAULT_PORT,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_HOURS * 3600),
            ws_ticket_ttl: Duration::from_secs(DEFAULT_WS_TICKET_TTL_SECS),
            channel_require_membership: false,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a TTL of `unit_secs`-sized units, bounded by [`MAX_TTL_SECS`].
pub(crate) fn env_ttl(key: &'static str, default: u64, unit_secs: u64) -> Result<Duration, ConfigError> {
    let value = env_parse(key, default);
    value
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_TTL_SECS)
        .map(Duration::from_secs)
        .ok_or(ConfigError::OutOfRange { key, value })
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
