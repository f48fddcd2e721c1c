//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;

use engagement_core::domain::Channel;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// When unset the service keeps everything in memory.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    pub pass_interval: Duration,
    pub pass_concurrency: usize,
    pub manual_trigger_timeout: Duration,
    pub delivery_retry_after: Duration,
    pub goal_staleness_days: u32,
    pub activity_window_days: u32,
    pub channels: Vec<Channel>,
    pub notification_webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            log_level: Level::INFO,
            cors_origin: "http://localhost:3000".to_string(),
            pass_interval: Duration::from_secs(900),
            pass_concurrency: 8,
            manual_trigger_timeout: Duration::from_secs(30),
            delivery_retry_after: Duration::from_secs(900),
            goal_staleness_days: 7,
            activity_window_days: 30,
            channels: vec![Channel::InApp],
            notification_webhook_url: None,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        // --- Server and Database Settings ---
        let bind_address = parse_var("BIND_ADDRESS", defaults.bind_address)?;
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or(defaults.cors_origin);

        // --- Reminder Engine Settings ---
        let pass_interval = Duration::from_secs(parse_var(
            "REMINDER_PASS_INTERVAL_SECS",
            defaults.pass_interval.as_secs(),
        )?);
        if pass_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "REMINDER_PASS_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let pass_concurrency =
            parse_var("REMINDER_PASS_CONCURRENCY", defaults.pass_concurrency)?.max(1);
        let manual_trigger_timeout = Duration::from_secs(parse_var(
            "MANUAL_TRIGGER_TIMEOUT_SECS",
            defaults.manual_trigger_timeout.as_secs(),
        )?);
        let delivery_retry_after = Duration::from_secs(parse_var(
            "DELIVERY_RETRY_AFTER_SECS",
            pass_interval.as_secs(),
        )?);
        let goal_staleness_days = parse_var("GOAL_STALENESS_DAYS", defaults.goal_staleness_days)?;
        let activity_window_days =
            parse_var("ACTIVITY_WINDOW_DAYS", defaults.activity_window_days)?;

        let channels = match std::env::var("REMINDER_CHANNELS") {
            Ok(raw) => parse_channels(&raw)
                .map_err(|e| ConfigError::InvalidValue("REMINDER_CHANNELS".to_string(), e))?,
            Err(_) => defaults.channels,
        };
        let notification_webhook_url = std::env::var("NOTIFICATION_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.is_empty());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            pass_interval,
            pass_concurrency,
            manual_trigger_timeout,
            delivery_retry_after,
            goal_staleness_days,
            activity_window_days,
            channels,
            notification_webhook_url,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Parses an ordered, comma-separated channel list such as `sms,push`.
pub fn parse_channels(raw: &str) -> Result<Vec<Channel>, String> {
    let mut channels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let channel =
            Channel::parse(part).ok_or_else(|| format!("unknown channel '{}'", part))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    if channels.is_empty() {
        return Err("at least one channel is required".to_string());
    }
    Ok(channels)
}
