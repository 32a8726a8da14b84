use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::jobs::{Schedule, ScheduleError};
use crate::pattern::TokenPattern;
use crate::scan::{ScanSettings, WorkerErrorPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "./configs/config.yaml";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PAGE_SIZE: u32 = 100;
/// GitLab caps GraphQL connections at 100 nodes per page.
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid CRON: {0}")]
    Schedule(#[from] ScheduleError),
}

/// On-disk YAML shape. Every field is optional; environment variables fill
/// or override them.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub gitlab: GitlabSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitlabSection {
    #[serde(rename = "base_url")]
    pub base_url: Option<String>,
    pub pattern: Option<String>,
    pub response_objects_size: Option<u32>,
    pub pool_size: Option<usize>,
    pub cron: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub halt_worker_on_error: Option<bool>,
}

/// Validated runtime configuration.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub gitlab_token: String,
    /// No trailing slash.
    pub base_url: String,
    pub pattern: String,
    pub page_size: u32,
    pub pool_size: usize,
    pub schedule: Schedule,
    pub request_timeout: Duration,
    pub error_policy: WorkerErrorPolicy,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("gitlab_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("pattern", &self.pattern)
            .field("page_size", &self.page_size)
            .field("pool_size", &self.pool_size)
            .field("schedule", &self.schedule.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("error_policy", &self.error_policy)
            .finish()
    }
}

impl Config {
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            pattern: self.pattern.clone(),
            page_size: self.page_size,
            pool_size: self.pool_size,
            error_policy: self.error_policy,
        }
    }

    /// Merge a parsed file with environment lookups and validate the result.
    /// Non-empty environment values win over the file.
    pub fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let gitlab = file.gitlab;

        let gitlab_token = env("GITLAB_TOKEN").ok_or(ConfigError::Missing("GITLAB_TOKEN"))?;

        let base_url = env("GITLAB_URL")
            .or(gitlab.base_url)
            .ok_or(ConfigError::Missing("GITLAB_URL"))?;
        let base_url = validate_base_url(&base_url)?;

        let pattern = env("GITLAB_PATTERN")
            .or(gitlab.pattern)
            .ok_or(ConfigError::Missing("GITLAB_PATTERN"))?;
        TokenPattern::compile(&pattern).map_err(|e| ConfigError::Invalid {
            key: "GITLAB_PATTERN",
            reason: e.to_string(),
        })?;

        let cron = env("CRON").or(gitlab.cron).ok_or(ConfigError::Missing("CRON"))?;
        let schedule = Schedule::parse(&cron)?;

        let port = overridden(&env, "SERVER_PORT", file.server.port).unwrap_or(DEFAULT_PORT);

        let page_size = overridden(&env, "OBJECTS_PER_PAGE", gitlab.response_objects_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::Invalid {
                key: "OBJECTS_PER_PAGE",
                reason: format!("{page_size} is outside 1..={MAX_PAGE_SIZE}"),
            });
        }

        let pool_size = overridden(&env, "POOL_SIZE", gitlab.pool_size).unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "POOL_SIZE",
                reason: "must be at least 1".into(),
            });
        }

        let timeout_secs = overridden(&env, "REQUEST_TIMEOUT_SECS", gitlab.request_timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                reason: "must be at least 1".into(),
            });
        }

        let halt = match env("HALT_WORKER_ON_ERROR") {
            Some(raw) => parse_bool(&raw).or_else(|| {
                tracing::warn!(key = "HALT_WORKER_ON_ERROR", value = %raw, "ignoring unparseable override");
                gitlab.halt_worker_on_error
            }),
            None => gitlab.halt_worker_on_error,
        }
        .unwrap_or(true);

        Ok(Config {
            port,
            gitlab_token,
            base_url,
            pattern,
            page_size,
            pool_size,
            schedule,
            request_timeout: Duration::from_secs(timeout_secs),
            error_policy: if halt {
                WorkerErrorPolicy::HaltWorker
            } else {
                WorkerErrorPolicy::Continue
            },
        })
    }
}

/// Load configuration from `path` (if it exists) and the process environment.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let file = match read_file(path)? {
        Some(file) => {
            tracing::info!(path = %path.display(), "loaded config file");
            file
        }
        None => {
            tracing::warn!(path = %path.display(), "config file not found, using environment only");
            FileConfig::default()
        }
    };
    Config::from_sources(file, |key| std::env::var(key).ok())
}

/// `Ok(None)` when the file does not exist.
pub fn read_file(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Some(FileConfig::default()));
    }
    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

fn overridden<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    file_value: Option<T>,
) -> Option<T> {
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable override");
                file_value
            }
        },
        None => file_value,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::Invalid {
        key: "GITLAB_URL",
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::Invalid {
            key: "GITLAB_URL",
            reason: format!("'{trimmed}' is not an http(s) URL"),
        });
    }
    Ok(trimmed.to_string())
}
