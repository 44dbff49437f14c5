//! Environment-driven configuration for the progress client.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use progress_engine::{BackoffPolicy, ConnectionSettings};
use progress_logging::LevelFilter;
use thiserror::Error;
use url::Url;

pub(crate) const ENDPOINT: &str = "PROGRESS_ENDPOINT";
pub(crate) const ID_TOKEN: &str = "PROGRESS_ID_TOKEN";
pub(crate) const ACCESS_TOKEN: &str = "PROGRESS_ACCESS_TOKEN";
const STATE_DIR: &str = "PROGRESS_STATE_DIR";
const LOG_LEVEL: &str = "PROGRESS_LOG_LEVEL";
const LOG_FILE: &str = "PROGRESS_LOG_FILE";
const MAX_RECONNECTS: &str = "PROGRESS_MAX_RECONNECTS";
const BACKOFF_BASE_MS: &str = "PROGRESS_BACKOFF_BASE_MS";
const BACKOFF_MAX_MS: &str = "PROGRESS_BACKOFF_MAX_MS";

const DEFAULT_STATE_DIR: &str = "./state";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} is not a valid url: {reason}")]
    InvalidUrl { key: &'static str, reason: String },
    #[error("{key} must use ws:// or wss://, got {scheme}://")]
    UnsupportedScheme { key: &'static str, scheme: String },
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be one of off, error, warn, info, debug, trace; got {value:?}")]
    InvalidLogLevel { key: &'static str, value: String },
    #[error("PROGRESS_BACKOFF_BASE_MS ({base_ms}) exceeds PROGRESS_BACKOFF_MAX_MS ({max_ms})")]
    BackoffOrder { base_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub endpoint: Url,
    pub state_dir: PathBuf,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
    pub connection: ConnectionSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let raw_endpoint = get(ENDPOINT).ok_or(ConfigError::Missing(ENDPOINT))?;
        let endpoint = parse_endpoint(&raw_endpoint)?;

        let state_dir = get(STATE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let log_level = match get(LOG_LEVEL) {
            Some(value) => {
                LevelFilter::from_str(&value).map_err(|_| ConfigError::InvalidLogLevel {
                    key: LOG_LEVEL,
                    value,
                })?
            }
            None => LevelFilter::Info,
        };

        let defaults = ConnectionSettings::default();
        let max_reconnect_attempts = match get(MAX_RECONNECTS) {
            Some(value) => parse_number::<u32>(MAX_RECONNECTS, value)?,
            None => defaults.max_reconnect_attempts,
        };
        let base_ms = match get(BACKOFF_BASE_MS) {
            Some(value) => parse_number::<u64>(BACKOFF_BASE_MS, value)?,
            None => millis(defaults.backoff.base_delay),
        };
        let max_ms = match get(BACKOFF_MAX_MS) {
            Some(value) => parse_number::<u64>(BACKOFF_MAX_MS, value)?,
            None => millis(defaults.backoff.max_delay),
        };
        if base_ms > max_ms {
            return Err(ConfigError::BackoffOrder { base_ms, max_ms });
        }

        Ok(Self {
            endpoint,
            state_dir,
            log_level,
            log_file: get(LOG_FILE).map(PathBuf::from),
            connection: ConnectionSettings {
                backoff: BackoffPolicy {
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                },
                max_reconnect_attempts,
            },
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        key: ENDPOINT,
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            key: ENDPOINT,
            scheme: other.to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { key, value })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
