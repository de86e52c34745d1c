use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:22.04";
const DEFAULT_RUNTIME: &str = "docker";

const CONFIG_NAMES: [&str; 2] = ["config.yaml", "config.yml"];
const WORKSPACE_DIR: &str = ".tuprwre";

/// Container runtimes tuprwre knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerRuntime {
    #[default]
    Docker,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime {0:?} is not implemented yet")]
    NotImplemented(String),

    #[error("container runtime {0:?} is not supported (expected \"docker\")")]
    Unsupported(String),
}

impl ContainerRuntime {
    pub fn parse(name: &str) -> Result<Self, RuntimeError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "docker" => Ok(ContainerRuntime::Docker),
            "containerd" => Err(RuntimeError::NotImplemented(name.to_string())),
            _ => Err(RuntimeError::Unsupported(name.to_string())),
        }
    }
}

/// Configuration for tuprwre, read from `config.yaml`.
///
/// Every field is optional so that a workspace file can override a single
/// value from the global one.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Image install commands run in when `--base-image` is not given.
    #[serde(default)]
    pub base_image: Option<String>,

    /// Container runtime (`docker`).
    #[serde(default)]
    pub runtime: Option<String>,

    /// Default memory limit, e.g. `512m` or `25%`.
    #[serde(default)]
    pub memory: Option<String>,

    /// Default CPU limit, e.g. `2` or `50%`.
    #[serde(default)]
    pub cpus: Option<String>,
}

impl Config {
    pub fn base_image(&self) -> &str {
        self.base_image.as_deref().unwrap_or(DEFAULT_BASE_IMAGE)
    }

    pub fn runtime(&self) -> Result<ContainerRuntime, RuntimeError> {
        ContainerRuntime::parse(self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME))
    }

    pub fn memory(&self) -> &str {
        self.memory.as_deref().unwrap_or("")
    }

    pub fn cpus(&self) -> &str {
        self.cpus.as_deref().unwrap_or("")
    }

    /// Load global and workspace configs, then apply `TUPRWRE_*` overrides.
    pub fn load() -> anyhow::Result<Self> {
        debug!("config:loading");
        let global = Self::load_global()?.unwrap_or_default();
        let start_dir = std::env::current_dir().unwrap_or_default();
        let workspace = match find_workspace_config(&start_dir) {
            Some(path) => Self::load_from_path(&path)?.unwrap_or_default(),
            None => Self::default(),
        };

        let config = global
            .merge(workspace)
            .with_env_overrides(|key| std::env::var(key).ok());
        debug!(
            base_image = config.base_image(),
            runtime = ?config.runtime,
            memory = config.memory(),
            cpus = config.cpus(),
            "config:loaded"
        );
        Ok(config)
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        // An empty file deserializes to null.
        if contents.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    /// Load the global configuration file from `~/.config/tuprwre`.
    fn load_global() -> anyhow::Result<Option<Self>> {
        if let Some(home_dir) = home::home_dir() {
            let dir = home_dir.join(".config/tuprwre");
            for name in CONFIG_NAMES {
                let path = dir.join(name);
                if path.exists() {
                    return Self::load_from_path(&path);
                }
            }
        }
        Ok(None)
    }

    /// Workspace values win field by field.
    fn merge(self, workspace: Self) -> Self {
        Self {
            base_image: workspace.base_image.or(self.base_image),
            runtime: workspace.runtime.or(self.runtime),
            memory: workspace.memory.or(self.memory),
            cpus: workspace.cpus.or(self.cpus),
        }
    }

    /// Apply non-empty `TUPRWRE_*` variables from `lookup`.
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("TUPRWRE_BASE_IMAGE") {
            self.base_image = Some(v);
        }
        if let Some(v) = get("TUPRWRE_RUNTIME") {
            self.runtime = Some(v);
        }
        if let Some(v) = get("TUPRWRE_MEMORY") {
            self.memory = Some(v);
        }
        if let Some(v) = get("TUPRWRE_CPUS") {
            self.cpus = Some(v);
        }
        self
    }
}

/// Find the nearest `.tuprwre/config.yaml` by walking up from `start_dir`.
pub fn find_workspace_config(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir
        .canonicalize()
        .unwrap_or_else(|_| start_dir.to_path_buf());
    loop {
        for name in CONFIG_NAMES {
            let candidate = dir.join(WORKSPACE_DIR).join(name);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "config:found workspace config");
                return Some(candidate);
            }
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Where shims and their metadata live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$TUPRWRE_DIR`, or `~/.tuprwre`.
    pub fn locate() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(dir) = lookup("TUPRWRE_DIR").filter(|d| !d.trim().is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = home::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self::new(home.join(".tuprwre")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shim_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// Create the shim and metadata directories.
    pub fn ensure(&self) -> anyhow::Result<()> {
        for dir in [self.shim_dir(), self.metadata_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}
