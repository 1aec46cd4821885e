use std::path::PathBuf;

use clap::Parser;

use crate::domain::Strategy;

/// Sorts spam out of IMAP mailboxes using spamd and rspamd.
#[derive(Debug, Default, Parser)]
#[command(name = "eatspam", version)]
pub struct Cli {
    /// Location of the YAML configuration file.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
    /// Location of the key used to encrypt passwords.
    #[arg(long)]
    pub key_file: Option<PathBuf>,
    /// Keep running, check mailboxes every interval and serve the dashboard.
    #[arg(long)]
    pub daemon: bool,
    /// Check interval such as `300s`, `5m`, `1h`.
    #[arg(long)]
    pub interval: Option<String>,
    #[arg(long)]
    pub strategy: Option<Strategy>,
    #[arg(long)]
    pub http_port: Option<u16>,
    /// Subject prefix used by the `rewrite subject` action.
    #[arg(long)]
    pub spam_mark: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Print the encrypted form of a password for use in the config file.
    Encrypt { plaintext: String },
}
