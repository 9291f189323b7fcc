//! Configuration loading and validation
//!
//! Sources, lowest priority first:
//! - TOML file named by `STATUSBEACON_CONFIG` (optional)
//! - Environment variables (a `.env` file is preloaded by the binary)
//!
//! Everything is validated up front; the agent refuses to start on a bad value.

use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::query::QueryProtocol;

pub const CONFIG_PATH_ENV: &str = "STATUSBEACON_CONFIG";

pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_QUERY_TIMEOUT: Duration = Duration::from_millis(100);

const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;
const DEFAULT_HEARTBEAT_MS: u64 = 300_000;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 2_500;
const DEFAULT_QUERY_ATTEMPTS: u32 = 2;
const DEFAULT_LABEL: &str = "ATS Convoy Server";
const DEFAULT_STATE_FILE: &str = "./last_state.json";

/// Optional TOML config file; keys are the environment names in snake case
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub webhook_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub interval_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub server_label: Option<String>,
    pub display_maxplayers: Option<u32>,
    pub state_file: Option<PathBuf>,
    pub query_protocol: Option<String>,
    pub query_timeout_ms: Option<u64>,
    pub query_attempts: Option<u32>,
}

impl ConfigFile {
    pub async fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::File {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::FileFormat {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid {key} '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key} must be >= {min}ms (got {value}ms)")]
    TooSmall {
        key: &'static str,
        min: u128,
        value: u64,
    },
    #[error("cannot read config file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    FileFormat {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Immutable agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Url,
    pub host: String,
    pub port: u16,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub server_label: String,
    /// Shown instead of a misreported max player count
    pub display_capacity: Option<u32>,
    pub state_file: PathBuf,
    pub query_protocol: QueryProtocol,
    pub query_timeout: Duration,
    pub query_attempts: u32,
}

impl Config {
    /// Loads the optional config file, overlays the environment, validates
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok()).await
    }

    /// Same as [`Config::load`] with the environment read through `env`
    pub async fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match non_blank(env(CONFIG_PATH_ENV)) {
            Some(path) => ConfigFile::read(Path::new(&path)).await?,
            None => ConfigFile::default(),
        };
        Self::from_layers(file, env)
    }

    /// Builds a config from environment-style lookups only
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_layers(ConfigFile::default(), lookup)
    }

    /// Environment values win over the file; blank values count as unset in both
    pub fn from_layers<F>(file: ConfigFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_blank(env(key));

        let raw_url = get("WEBHOOK_URL")
            .or(non_blank(file.webhook_url))
            .ok_or(ConfigError::Missing("WEBHOOK_URL"))?;
        let webhook_url = parse_webhook_url(&raw_url)?;

        let host = get("HOST")
            .or(non_blank(file.host))
            .ok_or(ConfigError::Missing("HOST"))?;
        let port = layered("PORT", get("PORT"), file.port)?.ok_or(ConfigError::Missing("PORT"))?;

        let poll_interval = millis(
            "INTERVAL_MS",
            layered("INTERVAL_MS", get("INTERVAL_MS"), file.interval_ms)?,
            DEFAULT_POLL_INTERVAL_MS,
            MIN_POLL_INTERVAL,
        )?;
        let heartbeat_interval = millis(
            "HEARTBEAT_MS",
            layered("HEARTBEAT_MS", get("HEARTBEAT_MS"), file.heartbeat_ms)?,
            DEFAULT_HEARTBEAT_MS,
            MIN_HEARTBEAT_INTERVAL,
        )?;
        let query_timeout = millis(
            "QUERY_TIMEOUT_MS",
            layered("QUERY_TIMEOUT_MS", get("QUERY_TIMEOUT_MS"), file.query_timeout_ms)?,
            DEFAULT_QUERY_TIMEOUT_MS,
            MIN_QUERY_TIMEOUT,
        )?;

        let query_attempts = layered("QUERY_ATTEMPTS", get("QUERY_ATTEMPTS"), file.query_attempts)?
            .unwrap_or(DEFAULT_QUERY_ATTEMPTS);
        if query_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "QUERY_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let display_capacity = layered(
            "DISPLAY_MAXPLAYERS",
            get("DISPLAY_MAXPLAYERS"),
            file.display_maxplayers,
        )?
        .filter(|n| *n > 0);

        let query_protocol = match get("QUERY_PROTOCOL").or(non_blank(file.query_protocol)) {
            Some(v) => parse_value::<QueryProtocol>("QUERY_PROTOCOL", &v)?,
            None => QueryProtocol::Valve,
        };

        Ok(Self {
            webhook_url,
            host,
            port,
            poll_interval,
            heartbeat_interval,
            server_label: get("SERVER_LABEL")
                .or(non_blank(file.server_label))
                .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            display_capacity,
            state_file: get("STATE_FILE")
                .map(PathBuf::from)
                .or(file.state_file.filter(|p| !p.as_os_str().is_empty()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            query_protocol,
            query_timeout,
            query_attempts,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Environment value (parsed) if set, otherwise the file value
fn layered<T>(
    key: &'static str,
    env: Option<String>,
    file: Option<T>,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env {
        Some(v) => parse_value(key, &v).map(Some),
        None => Ok(file),
    }
}

fn parse_webhook_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "WEBHOOK_URL",
        value: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid("expected an http(s) URL".to_string()));
    }
    Ok(url)
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Intervals are always numbers of milliseconds, never free text
fn millis(
    key: &'static str,
    value: Option<u64>,
    default_ms: u64,
    min: Duration,
) -> Result<Duration, ConfigError> {
    let ms = value.unwrap_or(default_ms);
    if u128::from(ms) < min.as_millis() {
        return Err(ConfigError::TooSmall {
            key,
            min: min.as_millis(),
            value: ms,
        });
    }
    Ok(Duration::from_millis(ms))
}
