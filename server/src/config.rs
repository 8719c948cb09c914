//! Configuration management for the daemon.
//!
//! Settings come from a JSON file (path in `CONFIG_PATH`); every key can be
//! overridden by the environment variable of the same name in upper case.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use listsync_engine::SyncDirectionPolicy;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Name of the shopping list on A
    pub alexa_list_name: String,
    /// Name of the to-do list on B
    pub ms_list_name: String,
    /// Which way changes flow
    pub policy: SyncDirectionPolicy,
    /// Time between cycle starts
    pub sync_interval: Duration,
    /// Credentials of the A adapter
    pub alexa_cookie_file: PathBuf,
    /// Credentials of the B adapter
    pub ms_token_file: PathBuf,
    /// Serve the status surface
    pub webserver: bool,
    pub webserver_port: u16,
    /// Where the anchor is persisted
    pub state_file: PathBuf,
    /// Backing files of the JSON list adapters
    pub alexa_list_file: PathBuf,
    pub ms_list_file: PathBuf,
    /// Bound on every remote call
    pub call_timeout: Duration,
    /// Attempts per operation, first try included
    pub retry_attempts: u32,
}

/// The config file as written by hand. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    alexa_list_name: Option<String>,
    ms_list_name: Option<String>,
    sync_direction: Option<String>,
    delete_origin: Option<bool>,
    sync_interval: Option<u64>,
    alexa_cookie_file: Option<String>,
    ms_token_file: Option<String>,
    webserver: Option<bool>,
    webserver_port: Option<u16>,
    state_file: Option<String>,
    alexa_list_file: Option<String>,
    ms_list_file: Option<String>,
    call_timeout_secs: Option<u64>,
    retry_attempts: Option<u32>,
}

impl ConfigFile {
    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        override_string(&mut self.alexa_list_name, lookup("ALEXA_LIST_NAME"));
        override_string(&mut self.ms_list_name, lookup("MS_LIST_NAME"));
        override_string(&mut self.sync_direction, lookup("SYNC_DIRECTION"));
        override_string(&mut self.alexa_cookie_file, lookup("ALEXA_COOKIE_FILE"));
        override_string(&mut self.ms_token_file, lookup("MS_TOKEN_FILE"));
        override_string(&mut self.state_file, lookup("STATE_FILE"));
        override_string(&mut self.alexa_list_file, lookup("ALEXA_LIST_FILE"));
        override_string(&mut self.ms_list_file, lookup("MS_LIST_FILE"));

        if let Some(value) = lookup("DELETE_ORIGIN") {
            self.delete_origin = Some(parse_flag(&value));
        }
        if let Some(value) = lookup("WEBSERVER") {
            self.webserver = Some(parse_flag(&value));
        }
        parse_override(&mut self.sync_interval, "SYNC_INTERVAL", lookup)?;
        parse_override(&mut self.webserver_port, "WEBSERVER_PORT", lookup)?;
        parse_override(&mut self.call_timeout_secs, "CALL_TIMEOUT_SECS", lookup)?;
        parse_override(&mut self.retry_attempts, "RETRY_ATTEMPTS", lookup)?;
        Ok(())
    }
}

fn override_string(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

fn parse_override<T: std::str::FromStr>(
    slot: &mut Option<T>,
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        let parsed = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value })?;
        *slot = Some(parsed);
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Resolve `path` against the directory holding the config file.
pub fn resolve_path(path: &str, config_dir: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

impl Config {
    /// Load configuration from `CONFIG_PATH` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(Path::new(&path), |key| env::var(key).ok())
    }

    /// Load configuration from a file, with overrides from `lookup`.
    pub fn from_path(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file: ConfigFile =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        file.apply_env(&lookup)?;

        let config_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_file(file, &config_dir)
    }

    fn from_file(file: ConfigFile, config_dir: &Path) -> Result<Self, ConfigError> {
        let direction = file.sync_direction.unwrap_or_else(|| "both".to_string());
        let policy =
            SyncDirectionPolicy::from_direction(&direction, file.delete_origin.unwrap_or(false))
                .ok_or(ConfigError::InvalidValue {
                    key: "sync_direction",
                    value: direction,
                })?;

        let sync_interval = file.sync_interval.unwrap_or(30);
        if sync_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sync_interval",
                value: "0".to_string(),
            });
        }
        let retry_attempts = file.retry_attempts.unwrap_or(3);
        if retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry_attempts",
                value: "0".to_string(),
            });
        }

        let path_or = |value: Option<String>, default: &str| {
            resolve_path(value.as_deref().unwrap_or(default), config_dir)
        };

        Ok(Self {
            alexa_list_name: file.alexa_list_name.unwrap_or_else(|| "shop".to_string()),
            ms_list_name: file
                .ms_list_name
                .ok_or(ConfigError::Missing("ms_list_name"))?,
            policy,
            sync_interval: Duration::from_secs(sync_interval),
            alexa_cookie_file: path_or(file.alexa_cookie_file, "alexa_cookie.json"),
            ms_token_file: path_or(file.ms_token_file, "ms_token.json"),
            webserver: file.webserver.unwrap_or(false),
            webserver_port: file.webserver_port.unwrap_or(8080),
            state_file: path_or(file.state_file, "state.json"),
            alexa_list_file: path_or(file.alexa_list_file, "alexa_list.json"),
            ms_list_file: path_or(file.ms_list_file, "ms_list.json"),
            call_timeout: Duration::from_secs(file.call_timeout_secs.unwrap_or(10)),
            retry_attempts,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
