use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command;
use crate::config::{Config, DataDir};
use crate::discovery::{Binary, Discoverer};
use crate::sandbox::{
    Engine, EngineConnector, ResourcePolicy, Sandbox, generate_image_name, resources,
};
use crate::shell::piped_script_command;
use crate::shim::{InstallMode, ShimMetadata, ShimStore, current_executable, dir_on_path};
use crate::spinner;

pub struct InstallArgs {
    pub base_image: Option<String>,
    pub container: Option<String>,
    pub image: Option<String>,
    pub script: Option<PathBuf>,
    pub force: bool,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    pub command: Vec<String>,
}

/// What runs inside the install container.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallSource {
    Command(String),
    Script {
        path: PathBuf,
        content: Vec<u8>,
        args: Vec<String>,
    },
}

impl InstallSource {
    /// With `--script`, trailing words are the script's arguments; otherwise
    /// they are joined into one shell command.
    pub fn resolve(script: Option<&Path>, words: Vec<String>) -> Result<Self> {
        if let Some(script) = script {
            let path = std::path::absolute(script)
                .with_context(|| format!("Script file not found: {}", script.display()))?;
            let content = std::fs::read(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow::anyhow!("Script file not found: {}", path.display())
                } else {
                    anyhow::anyhow!("Failed to read script {}: {}", path.display(), e)
                }
            })?;
            return Ok(Self::Script {
                path,
                content,
                args: words,
            });
        }

        let command = words.join(" ");
        if command.trim().is_empty() {
            bail!("No installation command provided");
        }
        Ok(Self::Command(command))
    }

    /// The `sh -c` payload.
    pub fn shell_command(&self) -> String {
        match self {
            Self::Command(command) => command.clone(),
            Self::Script { content, args, .. } => piped_script_command(content, args),
        }
    }

    fn metadata(
        &self,
        binary: &Binary,
        base_image: &str,
        output_image: &str,
        force: bool,
    ) -> ShimMetadata {
        let (install_mode, install_command, install_script_path, install_script_args) = match self {
            Self::Command(command) => (InstallMode::Command, command.clone(), None, Vec::new()),
            Self::Script { path, args, .. } => (
                InstallMode::Script,
                String::new(),
                Some(path.display().to_string()),
                args.clone(),
            ),
        };
        ShimMetadata {
            binary_name: binary.name.clone(),
            install_command,
            install_mode,
            install_script_path,
            install_script_args,
            base_image: base_image.to_string(),
            output_image: output_image.to_string(),
            installed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            force,
        }
    }
}

/// A fully resolved install.
pub struct InstallPlan {
    pub source: InstallSource,
    pub base_image: String,
    /// Resume from this container instead of running the install.
    pub container: Option<String>,
    pub image_name: String,
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct InstallReport {
    pub image_name: String,
    pub created: Vec<String>,
    pub failed: Vec<String>,
}

pub async fn run(
    args: InstallArgs,
    engines: &EngineConnector,
    cancel: CancellationToken,
) -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    config.runtime()?;
    let data_dir = DataDir::locate()?;
    let store = command::shim_store(&data_dir)?;

    let source = InstallSource::resolve(args.script.as_deref(), args.command)?;
    let plan = InstallPlan {
        source,
        base_image: args
            .base_image
            .unwrap_or_else(|| config.base_image().to_string()),
        container: args.container,
        image_name: args.image.unwrap_or_else(generate_image_name),
        force: args.force,
    };

    let sandbox = command::connect(engines).await?;
    let spec = resources::merge(
        args.memory.as_deref().unwrap_or(""),
        args.cpus.unwrap_or(0.0),
        config.memory(),
        config.cpus(),
    );
    let policy = sandbox.resolve_resources(&spec, &cancel).await?;

    let report = execute(&sandbox, &store, &plan, policy, &cancel).await?;

    let shim_dir = store.shim_dir().display().to_string();
    println!(
        "\nInstallation complete! {} shim(s) point at {}.",
        report.created.len(),
        report.image_name
    );
    let path_var = std::env::var("PATH").unwrap_or_default();
    if !dir_on_path(store.shim_dir(), &path_var) {
        println!("Add {} to your PATH:", shim_dir);
        println!("  export PATH=\"{}:$PATH\"", shim_dir);
    }
    Ok(())
}

/// Run (or resume), commit, discover, and write shims.
///
/// A container this call created is removed before returning, whatever the
/// outcome; a resumed container is left alone.
pub async fn execute<E: Engine>(
    sandbox: &Sandbox<E>,
    store: &ShimStore,
    plan: &InstallPlan,
    policy: ResourcePolicy,
    cancel: &CancellationToken,
) -> Result<InstallReport> {
    let (container_id, owned) = match &plan.container {
        Some(id) => {
            println!("Using existing container: {}", id);
            (id.clone(), false)
        }
        None => {
            println!("Creating sandbox container from image: {}", plan.base_image);
            println!("Running installation command...\n");
            let id = sandbox
                .run_install(&plan.base_image, &plan.source.shell_command(), policy, cancel)
                .await
                .context("Installation failed")?;
            println!("\nContainer finished successfully: {}", id);
            (id, true)
        }
    };

    let result = commit_and_shim(sandbox, store, plan, &container_id, cancel).await;
    if owned {
        sandbox.cleanup_quietly(&container_id).await;
    }
    result
}

async fn commit_and_shim<E: Engine>(
    sandbox: &Sandbox<E>,
    store: &ShimStore,
    plan: &InstallPlan,
    container_id: &str,
    cancel: &CancellationToken,
) -> Result<InstallReport> {
    let image_name = plan.image_name.as_str();
    let commit = async {
        spinner::with_spinner(
            &format!("Committing container to image {}", image_name),
            sandbox.commit(container_id, image_name),
        )
        .await
        .context("Failed to commit container")
    };
    or_cancelled(cancel, commit).await?;

    let discover = async {
        spinner::with_spinner(
            "Discovering installed binaries",
            Discoverer::new(sandbox).discover(&plan.base_image, image_name),
        )
        .await
        .context("Failed to discover binaries")
    };
    let binaries = or_cancelled(cancel, discover).await?;
    println!("Discovered {} new binaries", binaries.len());
    info!(image = image_name, count = binaries.len(), "install:discovered");

    let tuprwre = current_executable();
    let mut report = InstallReport {
        image_name: image_name.to_string(),
        ..Default::default()
    };
    for binary in &binaries {
        if let Err(e) = store.create(&binary.name, image_name, &tuprwre, plan.force) {
            warn!(binary = %binary.name, error = %e, "install:shim failed");
            command::warn(format!("failed to create shim for {}: {}", binary.name, e));
            report.failed.push(binary.name.clone());
            continue;
        }
        let metadata = plan
            .source
            .metadata(binary, &plan.base_image, image_name, plan.force);
        if let Err(e) = store.save_metadata(&metadata) {
            command::warn(format!("failed to persist metadata for {}: {}", binary.name, e));
        }
        println!("Created shim: {}", binary.name);
        report.created.push(binary.name.clone());
    }
    Ok(report)
}

/// Run `step` unless the install is cancelled first.
async fn or_cancelled<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("Installation cancelled"),
        result = step => result,
    }
}
