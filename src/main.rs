mod app;
mod classifier;
mod cli;
mod config;
mod dashboard;
mod domain;
mod infrastructure;
mod mailbox;
mod tasks;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use infrastructure::{directories, logging, secrets::SecretKey, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Some(Command::Encrypt { plaintext }) = &cli.command {
        let key_file = config::key_file_path(&cli);
        let (key, created) = SecretKey::load_or_create(&key_file)?;
        if created {
            eprintln!("created new key file {}", key_file.display());
        }
        println!("{}", key.encrypt(plaintext)?);
        return Ok(());
    }

    let config = config::load_config(&cli)?;
    let paths = directories::ensure_directories(&config)?;
    logging::init_tracing(&config.logging, &paths)?;
    match &config.config_file {
        Some(path) => tracing::info!(target: "config", file = %path.display(), "configuration loaded"),
        None => tracing::info!(target: "config", "no config file found, using defaults and environment"),
    }

    let shutdown = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let app = app::EatspamApp::initialize(config, paths, shutdown).await?;
    app.run().await
}
