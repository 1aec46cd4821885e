use std::{fmt, io, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{ActionThresholds, Backend, InboxBehaviour, Strategy};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub accounts: Vec<AccountConfig>,
    pub spamd: SpamdConfig,
    pub rspamd: RspamdConfig,
    pub http: HttpConfig,
    pub strategy: Strategy,
    pub thresholds: ActionThresholds,
    pub marking: MarkingConfig,
    pub interval: Duration,
    pub daemon: bool,
    pub key_file: PathBuf,
    pub logging: LoggingConfig,
    pub queue_capacity: usize,
    pub collect_metrics: bool,
    /// File the settings were read from, `None` when running on defaults.
    pub config_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn is_enabled(&self, backend: Backend) -> bool {
        match backend {
            Backend::Spamd => self.spamd.enabled,
            Backend::Rspamd => self.rspamd.enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Hex ciphertext produced by `eatspam encrypt`.
    pub password: String,
    pub insecure_skip_verify: bool,
    pub inbox: String,
    pub quarantine: String,
    pub behaviour: InboxBehaviour,
}

#[derive(Debug, Clone)]
pub struct SpamdConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RspamdConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub controller_port: u16,
    /// Encrypted controller password, needed for learning only.
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct MarkingConfig {
    pub subject_mark: String,
    pub header_template: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub logs_dir: String,
    pub format: LogFormat,
}

/// Layout of the rolling log file. The console always gets plain text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no imap accounts configured")]
    NoAccounts,
    #[error("imap account `{0}` needs username, password and host")]
    IncompleteAccount(String),
    #[error("strategy {strategy} is set but {backend} is not enabled")]
    StrategyBackendDisabled { strategy: Strategy, backend: Backend },
    #[error("invalid interval `{0}`, expected <number><s|m|h|d>")]
    InvalidInterval(String),
    #[error("invalid action threshold `{0}`")]
    InvalidThreshold(String),
    #[error("invalid action `{0}`")]
    InvalidAction(String),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}
