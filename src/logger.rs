use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: OnceLock<()> = OnceLock::new();
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init() -> Result<()> {
    if INIT.get().is_some() {
        return Ok(());
    }

    init_inner()?;
    let _ = INIT.set(());
    Ok(())
}

fn init_inner() -> Result<()> {
    let log_path = determine_log_path()?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory at {}", parent.display()))?;
    }

    let (directory, file_name) = split_path(&log_path)?;
    let file_appender = rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

fn determine_log_path() -> Result<PathBuf> {
    let state_home = std::env::var("XDG_STATE_HOME").ok();
    if let Some(path) = log_path_in(state_home.as_deref(), home::home_dir()) {
        return Ok(path);
    }

    // Fallback to current directory if home cannot be determined
    Ok(std::env::current_dir()?.join("tuprwre.log"))
}

/// `$XDG_STATE_HOME/tuprwre/tuprwre.log`, else `~/.local/state/tuprwre/tuprwre.log`.
fn log_path_in(state_home: Option<&str>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(state_home) = state_home
        && !state_home.is_empty()
    {
        return Some(PathBuf::from(state_home).join("tuprwre").join("tuprwre.log"));
    }

    home_dir.map(|home| {
        home.join(".local")
            .join("state")
            .join("tuprwre")
            .join("tuprwre.log")
    })
}

fn split_path(path: &Path) -> Result<(PathBuf, &str)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name"))?;

    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_prefers_xdg_state_home() {
        let path = log_path_in(Some("/state"), Some(PathBuf::from("/home/u"))).unwrap();
        assert_eq!(path, PathBuf::from("/state/tuprwre/tuprwre.log"));
    }

    #[test]
    fn log_path_falls_back_to_home() {
        let expected = PathBuf::from("/home/u/.local/state/tuprwre/tuprwre.log");
        assert_eq!(log_path_in(Some(""), Some(PathBuf::from("/home/u"))), Some(expected.clone()));
        assert_eq!(log_path_in(None, Some(PathBuf::from("/home/u"))), Some(expected));
        assert_eq!(log_path_in(None, None), None);
    }

    #[test]
    fn split_path_separates_file_name() {
        let (dir, name) = split_path(Path::new("/var/log/tuprwre.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log"));
        assert_eq!(name, "tuprwre.log");
    }
}
