mod cli;
mod command;
mod config;
mod discovery;
mod logger;
mod sandbox;
mod shell;
mod shim;
mod spinner;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

/// How long to wait for stray blocking readers (stdin) at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "tuprwre start");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(cli::run());
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(0) => {
            info!("tuprwre finished successfully");
            Ok(())
        }
        Ok(code) => {
            info!(code, "tuprwre finished with exit code");
            std::process::exit(code);
        }
        Err(err) => {
            error!(error = ?err, "tuprwre failed");
            Err(err)
        }
    }
}
