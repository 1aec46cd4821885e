use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub logs_dir: PathBuf,
    pub key_file: PathBuf,
}

pub fn ensure_directories(config: &AppConfig) -> Result<ResolvedPaths> {
    let logs_dir = ensure_dir(Path::new(&config.logging.logs_dir))?;

    let key_file = config.key_file.clone();
    if let Some(parent) = key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let write_test = logs_dir.join(".write-test");
    fs::write(&write_test, b"ok")
        .with_context(|| format!("logs directory {} is not writable", logs_dir.display()))?;
    fs::remove_file(&write_test)?;

    Ok(ResolvedPaths { logs_dir, key_file })
}

fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(dir) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o750);
            let _ = fs::set_permissions(dir, perms);
        }
    }
    Ok(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()))
}
