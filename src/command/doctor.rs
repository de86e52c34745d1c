//! Preflight checks for the environment tuprwre runs in.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, DataDir};
use crate::sandbox::EngineConnector;
use crate::shim::dir_on_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: Status,
    pub critical: bool,
    pub message: String,
}

impl Check {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: Status::Pass,
            critical: true,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: Status::Fail,
            critical: true,
            message: message.into(),
        }
    }

    fn passed(&self) -> bool {
        self.status == Status::Pass
    }

    /// `[critical] Name: message`, without the status tag.
    fn describe(&self) -> String {
        let marker = if self.critical { "[critical] " } else { "" };
        format!("{}{}: {}", marker, self.name, self.message)
    }
}

#[derive(Debug, Serialize)]
struct Report {
    healthy: bool,
    checks: Vec<Check>,
}

impl Report {
    fn new(checks: Vec<Check>) -> Self {
        let healthy = checks.iter().all(|c| c.passed() || !c.critical);
        Self { healthy, checks }
    }
}

fn check_runtime(config: &Result<Config>) -> Check {
    const NAME: &str = "Runtime config";
    match config {
        Err(e) => Check::fail(NAME, format!("could not load config: {:#}", e)),
        Ok(config) => match config.runtime() {
            Ok(_) => Check::pass(NAME, "runtime docker"),
            Err(e) => Check::fail(NAME, e.to_string()),
        },
    }
}

fn check_shim_dir(shim_dir: &Path, path_var: &str) -> Check {
    const NAME: &str = "Shim directory";
    if !shim_dir.is_dir() {
        return Check::fail(
            NAME,
            format!("shim directory {} does not exist", shim_dir.display()),
        );
    }
    if !dir_on_path(shim_dir, path_var) {
        return Check::fail(
            NAME,
            format!("shim directory {} is not on PATH", shim_dir.display()),
        );
    }
    Check::pass(NAME, format!("shim directory on PATH: {}", shim_dir.display()))
}

/// Creates `dir` if needed and writes a scratch file into it.
fn check_writable(name: &'static str, dir: &Path) -> Check {
    let written = std::fs::create_dir_all(dir).and_then(|_| tempfile::NamedTempFile::new_in(dir));
    match written {
        Ok(_) => Check::pass(name, format!("{} is writable", dir.display())),
        Err(e) => Check::fail(name, format!("{} is not writable: {}", dir.display(), e)),
    }
}

async fn check_daemon(engines: &EngineConnector) -> Check {
    const NAME: &str = "Docker daemon";
    let engine = match engines.get().await {
        Ok(engine) => engine,
        Err(e) => return Check::fail(NAME, format!("daemon is not reachable: {}", e)),
    };
    match engine.server_version().await {
        Ok(version) if !version.is_empty() => {
            Check::pass(NAME, format!("reachable (server {})", version))
        }
        Ok(_) => Check::fail(NAME, "daemon reported an empty server version"),
        Err(e) => Check::fail(NAME, format!("version query failed: {}", e)),
    }
}

async fn collect(engines: &EngineConnector) -> Vec<Check> {
    let config = Config::load();
    let runtime = check_runtime(&config);
    let runtime_ok = runtime.passed();
    let mut checks = vec![runtime];

    match DataDir::locate() {
        Ok(data_dir) => {
            let path_var = std::env::var("PATH").unwrap_or_default();
            checks.push(check_shim_dir(&data_dir.shim_dir(), &path_var));
            checks.push(check_writable("State directory", data_dir.root()));
            checks.push(check_writable("Shim directory writable", &data_dir.shim_dir()));
        }
        Err(e) => checks.push(Check::fail("State directory", format!("{:#}", e))),
    }

    // Other runtimes are already reported above.
    if runtime_ok {
        checks.push(check_daemon(engines).await);
    }
    checks
}

pub async fn run(engines: &EngineConnector, json: bool) -> Result<()> {
    let report = Report::new(collect(engines).await);
    for check in report.checks.iter().filter(|c| !c.passed()) {
        debug!(check = check.name, message = %check.message, "doctor:check failed");
    }
    info!(healthy = report.healthy, "doctor:finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for check in &report.checks {
            let tag = match check.status {
                Status::Pass => style("[PASS]").green(),
                Status::Fail => style("[FAIL]").red(),
            };
            println!("{} {}", tag, check.describe());
        }
        if report.healthy {
            println!("{} All critical checks passed.", style("[PASS]").green());
        }
    }

    if !report.healthy {
        bail!("Critical preflight checks failed");
    }
    Ok(())
}
