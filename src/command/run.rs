use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command;
use crate::config::{Config, ContainerRuntime};
use crate::sandbox::{DiagnosticsMode, EngineConnector, RunRequest, host_user, resources};

/// Conventional exit code for a run stopped by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

pub struct RunArgs {
    pub image: String,
    pub workdir: Option<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub runtime: Option<String>,
    pub debug_io: bool,
    pub debug_io_json: bool,
    pub capture_file: Option<PathBuf>,
    pub read_only_cwd: bool,
    pub no_network: bool,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    pub command: Vec<String>,
}

/// The current directory mounted at the same path, after any extra volumes.
fn volumes_with_cwd(extra: &[String], cwd: &Path, read_only: bool) -> Vec<String> {
    let mut volumes = extra.to_vec();
    let mut mount = format!("{}:{}", cwd.display(), cwd.display());
    if read_only {
        mount.push_str(":ro");
    }
    volumes.push(mount);
    volumes
}

/// Build the request without touching the daemon or the process streams.
fn build_request(
    args: RunArgs,
    config: &Config,
    cwd: &Path,
    cancel: CancellationToken,
) -> Result<RunRequest> {
    let (binary, binary_args) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("No binary specified"))?;

    let mut request = RunRequest::new(args.image, binary.clone());
    request.args = binary_args.to_vec();
    request.workdir = Some(
        args.workdir
            .unwrap_or_else(|| cwd.display().to_string()),
    );
    request.env = args.env;
    request.volumes = volumes_with_cwd(&args.volumes, cwd, args.read_only_cwd);
    request.user = Some(host_user());
    request.capture_file = args.capture_file;
    request.network_disabled = args.no_network;
    request.resources = resources::merge(
        args.memory.as_deref().unwrap_or(""),
        args.cpus.unwrap_or(0.0),
        config.memory(),
        config.cpus(),
    );
    request.diagnostics = DiagnosticsMode {
        text: args.debug_io,
        json: args.debug_io_json,
    };
    request.cancel = cancel;
    Ok(request)
}

/// Run the binary and return its exit code verbatim.
pub async fn run(
    args: RunArgs,
    engines: &EngineConnector,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = Config::load().context("Failed to load config")?;
    match &args.runtime {
        Some(runtime) => ContainerRuntime::parse(runtime)?,
        None => config.runtime()?,
    };
    let cwd = std::env::current_dir().context("Failed to get current working directory")?;

    let mut request = build_request(args, &config, &cwd, cancel)?;
    request.stdin = Some(Box::new(tokio::io::stdin()));
    request.stdout = Some(Box::new(tokio::io::stdout()));
    request.stderr = Some(Box::new(tokio::io::stderr()));
    info!(image = %request.image, binary = %request.binary, "run:start");

    let sandbox = command::connect(engines).await?;
    match sandbox.run(request).await {
        Ok(code) => {
            debug!(code, "run:exited");
            Ok(i32::try_from(code).unwrap_or(1))
        }
        Err(e) if e.is_cancelled() => {
            debug!("run:cancelled");
            Ok(INTERRUPTED_EXIT)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Sandbox execution failed")),
    }
}
