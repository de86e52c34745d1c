//! Listing the executables an image puts on its `PATH`.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::engine::{ContainerSpec, Engine};
use super::error::{LifecyclePhase, Result, SandboxError};
use super::session::{Sandbox, container_name, short_id};
use crate::shell::shell_quote;

pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Keeps the inspection container alive while it is exec'd into.
const KEEPALIVE: [&str; 2] = ["sleep", "3600"];

/// `PATH` from a `KEY=VALUE` environment, or the conventional default.
pub fn path_from_env(env: &[String]) -> &str {
    env.iter()
        .find_map(|entry| entry.strip_prefix("PATH="))
        .unwrap_or(DEFAULT_PATH)
}

/// Shell command listing regular executable files directly inside each
/// `PATH` directory.
pub fn find_executables_command(path: &str) -> String {
    format!(
        "find $(echo {} | tr ':' ' ') -maxdepth 1 -type f -executable 2>/dev/null | sort -u",
        shell_quote(path)
    )
}

/// Trimmed, sorted, de-duplicated non-empty lines.
pub fn parse_listing(output: &[u8]) -> Vec<String> {
    let mut paths: Vec<String> = String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

impl<E: Engine> Sandbox<E> {
    /// Full paths of every executable in the image's `PATH` directories,
    /// found through a short-lived inspection container.
    pub async fn list_image_executables(&self, image: &str) -> Result<Vec<String>> {
        self.ensure_image(image).await?;

        let spec = ContainerSpec {
            name: container_name("tuprwre-inspect"),
            image: image.to_string(),
            cmd: KEEPALIVE.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let id = self.create(&spec, &CancellationToken::new()).await?;

        let listed = self.list_in_container(&id).await;
        self.cleanup_quietly(&id).await;
        listed
    }

    async fn list_in_container(&self, id: &str) -> Result<Vec<String>> {
        let engine = self.engine();
        engine
            .start(id)
            .await
            .map_err(|e| SandboxError::lifecycle(LifecyclePhase::Start, id, e))?;

        let env = engine
            .container_env(id)
            .await
            .map_err(|e| SandboxError::lifecycle(LifecyclePhase::Inspect, id, e))?;
        let path = path_from_env(&env);

        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            find_executables_command(path),
        ];
        let output = engine
            .exec_stdout(id, cmd)
            .await
            .map_err(|e| SandboxError::lifecycle(LifecyclePhase::Exec, id, e))?;

        let paths = parse_listing(&output);
        debug!(
            container = %short_id(id),
            path,
            count = paths.len(),
            "inventory:listed executables"
        );
        Ok(paths)
    }
}
