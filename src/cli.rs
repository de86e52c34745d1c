use std::path::PathBuf;

use crate::command;
use crate::command::install::InstallArgs;
use crate::command::run::RunArgs;
use crate::sandbox::EngineConnector;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exit code when a second interrupt arrives while the first is being
/// handled.
const FORCED_EXIT: i32 = 130;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "tuprwre")]
#[command(
    about = "Run install scripts in throwaway containers and use the installed tools through host shims"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an installation command in a sandbox and generate shims
    #[command(
        after_help = "Example:\n  tuprwre install -- \"curl -fsSL https://example.com/install-tool.sh | bash\""
    )]
    Install {
        /// Base image to install into (defaults to config, then ubuntu:22.04)
        #[arg(short = 'i', long)]
        base_image: Option<String>,

        /// Resume from an already-prepared container instead of running the command
        #[arg(short = 'c', long)]
        container: Option<String>,

        /// Name for the committed image (generated if omitted)
        #[arg(short = 'n', long)]
        image: Option<String>,

        /// Path to a local shell script to run instead of a command
        #[arg(short = 's', long)]
        script: Option<PathBuf>,

        /// Overwrite existing shims
        #[arg(short = 'f', long)]
        force: bool,

        /// Memory limit (e.g. 512m, 1g, 25%)
        #[arg(long)]
        memory: Option<String>,

        /// CPU limit in CPUs (e.g. 0.5, 2)
        #[arg(long)]
        cpus: Option<f64>,

        /// The installation command, or arguments for --script
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Execute a binary inside a sandboxed container (used by shims)
    Run {
        /// Image to run
        #[arg(short = 'i', long)]
        image: String,

        /// Working directory inside the container (defaults to the current directory)
        #[arg(short = 'w', long)]
        workdir: Option<String>,

        /// Environment variables to pass (KEY=VALUE)
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,

        /// Extra volume mounts (host:container[:ro])
        #[arg(short = 'v', long = "volume")]
        volumes: Vec<String>,

        /// Container runtime (docker|containerd)
        #[arg(short = 'r', long)]
        runtime: Option<String>,

        /// Print human-readable container I/O lifecycle diagnostics to stderr
        #[arg(long)]
        debug_io: bool,

        /// Emit container I/O diagnostics as NDJSON to stderr
        #[arg(long)]
        debug_io_json: bool,

        /// Write the combined stdout/stderr stream to a file
        #[arg(long)]
        capture_file: Option<PathBuf>,

        /// Mount the current directory read-only
        #[arg(long)]
        read_only_cwd: bool,

        /// Disable networking inside the container
        #[arg(long)]
        no_network: bool,

        /// Memory limit (e.g. 512m, 1g, 25%)
        #[arg(long)]
        memory: Option<String>,

        /// CPU limit in CPUs (e.g. 0.5, 2)
        #[arg(long)]
        cpus: Option<f64>,

        /// Binary to run, followed by its arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List installed shims
    #[command(visible_alias = "ls")]
    List,

    /// Remove shims and their metadata
    #[command(visible_alias = "rm")]
    Remove {
        /// Shim names to remove
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        names: Vec<String>,

        /// Remove every shim
        #[arg(long)]
        all: bool,

        /// Also remove the images the shims point at
        #[arg(long)]
        images: bool,
    },

    /// Remove stopped tuprwre containers and tuprwre images
    Clean {
        /// List what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Run preflight checks on the runtime, shim directory and daemon
    Doctor {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Commands that own a container and clean it up on Ctrl-C. Everything else
/// keeps the default SIGINT behaviour.
fn handles_interrupts(command: &Commands) -> bool {
    matches!(command, Commands::Install { .. } | Commands::Run { .. })
}

/// A token cancelled by the first Ctrl-C. A second one exits immediately.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        debug!("cli:interrupt received");
        on_interrupt.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cli:second interrupt, exiting");
            std::process::exit(FORCED_EXIT);
        }
    });
    cancel
}

/// Exit code the process should end with.
pub async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let engines = EngineConnector::new();
    let cancel = if handles_interrupts(&cli.command) {
        interrupt_token()
    } else {
        CancellationToken::new()
    };

    match cli.command {
        Commands::Install {
            base_image,
            container,
            image,
            script,
            force,
            memory,
            cpus,
            command,
        } => {
            command::install::run(
                InstallArgs {
                    base_image,
                    container,
                    image,
                    script,
                    force,
                    memory,
                    cpus,
                    command,
                },
                &engines,
                cancel,
            )
            .await?;
            Ok(0)
        }
        Commands::Run {
            image,
            workdir,
            env,
            volumes,
            runtime,
            debug_io,
            debug_io_json,
            capture_file,
            read_only_cwd,
            no_network,
            memory,
            cpus,
            command,
        } => {
            command::run::run(
                RunArgs {
                    image,
                    workdir,
                    env,
                    volumes,
                    runtime,
                    debug_io,
                    debug_io_json,
                    capture_file,
                    read_only_cwd,
                    no_network,
                    memory,
                    cpus,
                    command,
                },
                &engines,
                cancel,
            )
            .await
        }
        Commands::List => command::list::run().map(|_| 0),
        Commands::Remove { names, all, images } => {
            command::remove::run(&engines, &names, all, images).await?;
            Ok(0)
        }
        Commands::Clean { dry_run, force } => {
            command::clean::run(&engines, dry_run, force).await?;
            Ok(0)
        }
        Commands::Doctor { json } => {
            command::doctor::run(&engines, json).await?;
            Ok(0)
        }
    }
}
