use std::io;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use crate::{
    config::{LogFormat, LoggingConfig},
    infrastructure::directories::ResolvedPaths,
};

const LOG_FILE_PREFIX: &str = "eatspam.log";

/// Targets that are noisy at `debug` and only useful when asked for by name.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "imap"];

static INIT: OnceCell<()> = OnceCell::new();
static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// `RUST_LOG` wins over the configured level. Dependencies stay at `warn`
/// unless the level names them.
pub fn filter_directives(level: &str) -> String {
    let mut directives = level.trim().to_string();
    for target in QUIET_TARGETS {
        let named = directives
            .split(',')
            .any(|directive| directive.split('=').next() == Some(*target));
        if !named {
            directives.push_str(&format!(",{target}=warn"));
        }
    }
    directives
}

pub fn init_tracing(config: &LoggingConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(filter_directives(&config.level)))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, LOG_FILE_PREFIX);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);

        let file_layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(file_writer)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_ansi(true),
            )
            .with(file_layer)
            .try_init()?;

        tracing::info!(
            target: "lifecycle",
            logs = %paths.logs_dir.display(),
            level = %config.level,
            format = %config.format,
            "tracing initialized"
        );
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_are_quieted_unless_named() {
        assert_eq!(
            filter_directives("debug"),
            "debug,hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,imap=warn"
        );

        let named = filter_directives("info,imap=trace,hyper_util=debug");
        assert!(named.contains("imap=trace"));
        assert!(!named.contains("imap=warn"));
        assert!(named.contains("hyper=warn"));
    }
}
