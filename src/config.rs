use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use teloxide::types::ChatId;

use crate::video::client::JobTemplate;
use crate::video::workflow::PollPolicy;

const DEFAULT_STATUS_URL: &str = "https://api.useapi.net/v1/minimax/videos";
const DEFAULT_FILE_ID: &str = "user:1351-minimax:331665158743891972-file:33182776472855347233461";
const DEFAULT_MODEL: &str = "I2V-01";
const DEFAULT_MAX_JOBS: u32 = 2;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 90;

// Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+:[A-Za-z0-9_-]+$").unwrap());

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read or parse the env file.
    ReadFile { path: PathBuf, source: dotenvy::Error },
    /// A required variable is unset or blank.
    Missing(&'static str),
    /// A variable is set but its value is unusable.
    Invalid { name: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read env file '{}': {}", path.display(), source)
            }
            Self::Missing(name) => write!(f, "{} environment variable is required", name),
            Self::Invalid { name, reason } => write!(f, "invalid {}: {}", name, reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::Missing(_) | Self::Invalid { .. } => None,
        }
    }
}

pub struct Config {
    pub telegram_bot_token: String,
    /// Bearer token for useapi.net.
    pub useapi_token: String,
    /// Endpoint that accepts video creation requests.
    pub submit_url: String,
    /// Base URL for job status lookups; the job id is appended as a path segment.
    pub status_url: String,
    /// Fixed parts of every submission payload.
    pub job: JobTemplate,
    /// Public domain for webhook mode. Long polling is used when unset.
    pub webhook_domain: Option<String>,
    pub port: u16,
    pub poll: PollPolicy,
    /// Requests allowed per requester in the admission window.
    /// `None` keeps the gate advisory.
    pub admission_max_requests: Option<usize>,
    pub log_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    /// Load from the process environment, falling back to entries in `env_file`.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_vars = match env_file {
            Some(path) => read_env_file(path)?,
            None => HashMap::new(),
        };
        Self::from_lookup(|name| std::env::var(name).ok().or_else(|| file_vars.get(name).cloned()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let telegram_bot_token = required("BOT_TOKEN")?;
        if !TOKEN_PATTERN.is_match(&telegram_bot_token) {
            return Err(ConfigError::Invalid {
                name: "BOT_TOKEN",
                reason: "expected format 123456789:ABCdefGHI...".into(),
            });
        }

        let useapi_token = required("USEAPI_TOKEN")?;
        let submit_url = required("USEAPI_URL")?;
        validate_url("USEAPI_URL", &submit_url)?;
        let account = required("HAILUO_ACCOUNT")?;

        let status_url = get("USEAPI_STATUS_URL")
            .unwrap_or_else(|| DEFAULT_STATUS_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_url("USEAPI_STATUS_URL", &status_url)?;

        let job = JobTemplate {
            account,
            file_id: get("HAILUO_FILE_ID").unwrap_or_else(|| DEFAULT_FILE_ID.to_string()),
            model: get("HAILUO_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_jobs: parse_or(&get, "HAILUO_MAX_JOBS", DEFAULT_MAX_JOBS)?,
            prompt_optimization: parse_flag(&get, "PROMPT_OPTIMIZATION", true)?,
            reply_url: get("USEAPI_REPLY_URL"),
            reply_ref: get("USEAPI_REPLY_REF"),
        };

        let webhook_domain = get("WEBHOOK_DOMAIN").map(|d| {
            d.trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        });

        let interval_secs: u64 = parse_or(&get, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let max_attempts: u32 = parse_or(&get, "POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        let admission_max_requests = match get("ADMISSION_MAX_REQUESTS") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        name: "ADMISSION_MAX_REQUESTS",
                        reason: "must be at least 1".into(),
                    });
                }
                Ok(n) => Some(n),
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        name: "ADMISSION_MAX_REQUESTS",
                        reason: e.to_string(),
                    });
                }
            },
            None => None,
        };

        let log_chat_id = match get("LOG_CHAT_ID") {
            Some(raw) => Some(ChatId(raw.parse::<i64>().map_err(|e| ConfigError::Invalid {
                name: "LOG_CHAT_ID",
                reason: e.to_string(),
            })?)),
            None => None,
        };

        Ok(Self {
            telegram_bot_token,
            useapi_token,
            submit_url,
            status_url,
            job,
            webhook_domain,
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            poll: PollPolicy {
                interval: Duration::from_secs(interval_secs),
                max_attempts,
            },
            admission_max_requests,
            log_dir: get("LOG_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("logs")),
            log_chat_id,
        })
    }

    /// Full URL Telegram should deliver updates to, if webhook mode is on.
    pub fn webhook_url(&self) -> Option<String> {
        self.webhook_domain
            .as_ref()
            .map(|domain| format!("https://{}/webhook", domain))
    }
}

/// Read `KEY=value` pairs without touching the process environment.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let read_err = |e| ConfigError::ReadFile { path: path.to_path_buf(), source: e };
    dotenvy::from_path_iter(path)
        .map_err(read_err)?
        .map(|item| item.map_err(read_err))
        .collect()
}

fn validate_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid { name, reason: format!("'{}': {}", value, e) })
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid { name, reason: format!("'{}': {}", raw, e) }),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("'{}' is not a boolean", v),
            }),
        },
    }
}
