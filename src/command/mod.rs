pub mod clean;
pub mod doctor;
pub mod install;
pub mod list;
pub mod remove;
pub mod run;

use std::fmt::Display;

use anyhow::Result;
use console::style;

use crate::config::DataDir;
use crate::sandbox::{DockerEngine, EngineConnector, Sandbox};
use crate::shim::ShimStore;

/// A sandbox on the shared Docker connection.
pub async fn connect(engines: &EngineConnector) -> Result<Sandbox<DockerEngine>> {
    let engine = engines.get().await?;
    Ok(Sandbox::new(engine))
}

/// Shim store under the data directory, creating its directories.
pub fn shim_store(data_dir: &DataDir) -> Result<ShimStore> {
    data_dir.ensure()?;
    Ok(ShimStore::new(data_dir.shim_dir(), data_dir.metadata_dir()))
}

/// Print a yellow warning to stderr.
pub fn warn(message: impl Display) {
    eprintln!("{}", style(format!("Warning: {}", message)).yellow());
}
