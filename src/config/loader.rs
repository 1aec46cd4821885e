use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::{
    cli::Cli,
    domain::{ActionThresholds, InboxBehaviour, SpamAction, Strategy},
};

use super::env::{
    AccountConfig, AppConfig, ConfigError, HttpConfig, LogFormat, LoggingConfig, MarkingConfig,
    RspamdConfig, SpamdConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "config/eatspam.yaml";
pub const DEFAULT_KEY_FILE: &str = "config/eatspam.key";
pub const DEFAULT_SUBJECT_MARK: &str = "*** SPAM ***";
pub const DEFAULT_HEADER_TEMPLATE: &str = "X-Spam-Flag: {yes_no}\r\n\
X-Spam-Score: {score}\r\n\
X-Spam-Level: {level}\r\n\
X-Spam-Bar: {bar}\r\n\
X-Spam-Status: {yes_no_cap}, score={score}\r\n";

const DEFAULT_SPAMD_HOST: &str = "127.0.0.1";
const DEFAULT_SPAMD_PORT: u16 = 783;
const DEFAULT_SPAMD_TIMEOUT_SECS: u64 = 20;
const DEFAULT_RSPAMD_HOST: &str = "127.0.0.1";
const DEFAULT_RSPAMD_PORT: u16 = 11333;
const DEFAULT_RSPAMD_CONTROLLER_PORT: u16 = 11334;
const DEFAULT_RSPAMD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_INTERVAL: &str = "300s";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_INBOX: &str = "INBOX";
const DEFAULT_QUARANTINE: &str = "Spam";
const DEFAULT_QUEUE_CAPACITY: usize = 50;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let lookup = process_env;
    let path = config_path(cli, &lookup);
    let file = read_file(&path)?;
    AppConfig::from_sources(file, cli, &lookup)
}

/// Resolves the key file without requiring a complete configuration.
pub fn key_file_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.key_file {
        return path.clone();
    }
    if let Some(path) = process_env("KEY_FILE") {
        return PathBuf::from(path);
    }
    read_file(&config_path(cli, &process_env))
        .ok()
        .flatten()
        .and_then(|(_, file)| file.key_file)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE))
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn config_path(cli: &Cli, lookup: Lookup<'_>) -> PathBuf {
    cli.config_file
        .clone()
        .or_else(|| lookup("CONFIG_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub(crate) fn read_file(path: &Path) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str::<FileConfig>(&raw)
            .map(|file| Some((path.to_path_buf(), file)))
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct FileConfig {
    imap_accounts: Vec<FileAccount>,
    spamd: FileBackend,
    rspamd: FileBackend,
    http: FileHttp,
    daemon: Option<bool>,
    interval: Option<String>,
    spam_mark: Option<String>,
    spam_header: Option<String>,
    key_file: Option<String>,
    actions: Option<Mapping>,
    strategy: Option<Strategy>,
    log_level: Option<String>,
    logs_dir: Option<String>,
    log_format: Option<LogFormat>,
    queue_capacity: Option<usize>,
    collect_metrics: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileAccount {
    name: Option<String>,
    username: String,
    password: String,
    host: String,
    port: Option<u16>,
    insecure_skip_verify: bool,
    inbox: Option<String>,
    spam_folder: Option<String>,
    inbox_behaviour: InboxBehaviour,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileBackend {
    #[serde(rename = "use")]
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    controller_port: Option<u16>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileHttp {
    port: Option<u16>,
}

impl FileAccount {
    fn into_account(self) -> Result<AccountConfig, ConfigError> {
        let name = self.name.unwrap_or_else(|| self.host.clone());
        if self.username.is_empty() || self.password.is_empty() || self.host.is_empty() {
            return Err(ConfigError::IncompleteAccount(name));
        }
        Ok(AccountConfig {
            name,
            host: self.host,
            port: self.port.unwrap_or(DEFAULT_IMAP_PORT),
            username: self.username,
            password: self.password,
            insecure_skip_verify: self.insecure_skip_verify,
            inbox: self.inbox.unwrap_or_else(|| DEFAULT_INBOX.to_string()),
            quarantine: self
                .spam_folder
                .unwrap_or_else(|| DEFAULT_QUARANTINE.to_string()),
            behaviour: self.inbox_behaviour,
        })
    }
}

impl AppConfig {
    /// Merges command line, environment and file settings, in that order of precedence.
    pub(crate) fn from_sources(
        file: Option<(PathBuf, FileConfig)>,
        cli: &Cli,
        lookup: Lookup<'_>,
    ) -> Result<Self, ConfigError> {
        let (config_file, file) = match file {
            Some((path, file)) => (Some(path), file),
            None => (None, FileConfig::default()),
        };

        let accounts = file
            .imap_accounts
            .into_iter()
            .map(FileAccount::into_account)
            .collect::<Result<Vec<_>, _>>()?;
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let spamd = SpamdConfig {
            enabled: env_bool(lookup, "SPAMD_USE")?
                .or(file.spamd.enabled)
                .unwrap_or(true),
            host: lookup("SPAMD_HOST")
                .or(file.spamd.host)
                .unwrap_or_else(|| DEFAULT_SPAMD_HOST.to_string()),
            port: env_parse(lookup, "SPAMD_PORT")?
                .or(file.spamd.port)
                .unwrap_or(DEFAULT_SPAMD_PORT),
            timeout: Duration::from_secs(
                file.spamd
                    .timeout_secs
                    .unwrap_or(DEFAULT_SPAMD_TIMEOUT_SECS),
            ),
        };

        let rspamd = RspamdConfig {
            enabled: env_bool(lookup, "RSPAMD_USE")?
                .or(file.rspamd.enabled)
                .unwrap_or(true),
            host: lookup("RSPAMD_HOST")
                .or(file.rspamd.host)
                .unwrap_or_else(|| DEFAULT_RSPAMD_HOST.to_string()),
            port: env_parse(lookup, "RSPAMD_PORT")?
                .or(file.rspamd.port)
                .unwrap_or(DEFAULT_RSPAMD_PORT),
            controller_port: env_parse(lookup, "RSPAMD_CONTROLLER_PORT")?
                .or(file.rspamd.controller_port)
                .unwrap_or(DEFAULT_RSPAMD_CONTROLLER_PORT),
            password: lookup("RSPAMD_PASSWORD").or(file.rspamd.password),
            timeout: Duration::from_secs(
                file.rspamd
                    .timeout_secs
                    .unwrap_or(DEFAULT_RSPAMD_TIMEOUT_SECS),
            ),
        };

        let http = HttpConfig {
            port: match cli.http_port {
                Some(port) => port,
                None => env_parse(lookup, "HTTP_PORT")?
                    .or(file.http.port)
                    .unwrap_or(DEFAULT_HTTP_PORT),
            },
        };

        let strategy = match cli.strategy {
            Some(strategy) => strategy,
            None => env_parse(lookup, "STRATEGY")?
                .or(file.strategy)
                .unwrap_or(Strategy::Average),
        };

        let thresholds = match file.actions {
            Some(actions) if !actions.is_empty() => parse_thresholds(&actions)?,
            _ => ActionThresholds::default(),
        };

        let marking = MarkingConfig {
            subject_mark: cli
                .spam_mark
                .clone()
                .or_else(|| lookup("SPAM_MARK"))
                .or(file.spam_mark)
                .unwrap_or_else(|| DEFAULT_SUBJECT_MARK.to_string()),
            header_template: file
                .spam_header
                .unwrap_or_else(|| DEFAULT_HEADER_TEMPLATE.to_string()),
        };

        let interval_raw = cli
            .interval
            .clone()
            .or_else(|| lookup("INTERVAL"))
            .or(file.interval)
            .unwrap_or_else(|| DEFAULT_INTERVAL.to_string());
        let interval = parse_interval(&interval_raw)?;

        let daemon = cli.daemon || env_bool(lookup, "DAEMON")?.or(file.daemon).unwrap_or(false);

        let key_file = cli
            .key_file
            .clone()
            .or_else(|| lookup("KEY_FILE").map(PathBuf::from))
            .or_else(|| file.key_file.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE));

        let logging = LoggingConfig {
            level: cli
                .log_level
                .clone()
                .or_else(|| lookup("LOG_LEVEL"))
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            logs_dir: lookup("LOGS_DIR")
                .or(file.logs_dir)
                .unwrap_or_else(|| "logs".to_string()),
            format: env_parse(lookup, "LOG_FORMAT")?
                .or(file.log_format)
                .unwrap_or_default(),
        };

        let queue_capacity = env_parse(lookup, "QUEUE_CAPACITY")?
            .or(file.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
            .max(1);
        let collect_metrics = env_bool(lookup, "COLLECT_METRICS")?
            .or(file.collect_metrics)
            .unwrap_or(true);

        let config = Self {
            accounts,
            spamd,
            rspamd,
            http,
            strategy,
            thresholds,
            marking,
            interval,
            daemon,
            key_file,
            logging,
            queue_capacity,
            collect_metrics,
            config_file,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(backend) = self.strategy.required_backend() {
            if !self.is_enabled(backend) {
                return Err(ConfigError::StrategyBackendDisabled {
                    strategy: self.strategy,
                    backend,
                });
            }
        }
        Ok(())
    }
}

/// Parses `<number><unit>` with unit one of `s`, `m`, `h`, `d`.
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidInterval(raw.to_string());
    let trimmed = raw.trim();
    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let value: u64 = trimmed[..trimmed.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    match value.checked_mul(factor) {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(invalid()),
    }
}

fn parse_thresholds(actions: &Mapping) -> Result<ActionThresholds, ConfigError> {
    let mut entries = Vec::with_capacity(actions.len());
    for (key, value) in actions {
        let threshold = match key {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|threshold| threshold.is_finite())
        .ok_or_else(|| ConfigError::InvalidThreshold(format!("{key:?}")))?;

        let action = value
            .as_str()
            .ok_or_else(|| ConfigError::InvalidAction(format!("{value:?}")))?
            .parse::<SpamAction>()
            .map_err(|err| ConfigError::InvalidAction(err.0))?;
        entries.push((threshold, action));
    }
    Ok(ActionThresholds::new(entries))
}

fn env_parse<T: FromStr>(lookup: Lookup<'_>, key: &'static str) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}

fn env_bool(lookup: Lookup<'_>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    lookup(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value }),
        })
        .transpose()
}
