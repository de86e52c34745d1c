//! Host-side shims for sandboxed binaries.
//!
//! Each discovered binary gets a small bash script in the shim directory
//! that re-enters `tuprwre run` with the image it was installed into, plus a
//! JSON metadata record describing how it was installed.
//!
//! Layout:
//!   <data_dir>/bin/jq              (shim script)
//!   <data_dir>/metadata/jq.json    (install metadata)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use minijinja::{AutoEscape, Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::shell::shell_quote;

const SHIM_TEMPLATE: &str = r#"#!/bin/bash
# Generated shim for {{ binary }}
# Proxies execution to sandboxed container: {{ image }}
set -e

IMAGE_NAME={{ image | shell }}
BINARY_NAME={{ binary | shell }}
TUPRWRE_BIN={{ tuprwre | shell }}

if [ ! -x "${TUPRWRE_BIN}" ]; then
  TUPRWRE_BIN="tuprwre"
fi

exec "${TUPRWRE_BIN}" run --image "${IMAGE_NAME}" -- "${BINARY_NAME}" "$@"
"#;

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("shim already exists: {} (use --force to overwrite)", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("invalid binary name {0:?}")]
    InvalidName(String),

    #[error("shim {0:?} not found")]
    NotFound(String),

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid metadata {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to render shim: {0}")]
    Template(#[from] minijinja::Error),
}

pub type Result<T, E = ShimError> = std::result::Result<T, E>;

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> ShimError + 'a {
    move |source| ShimError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Command,
    Script,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::Command => "command",
            InstallMode::Script => "script",
        }
    }
}

/// How a shim came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShimMetadata {
    pub binary_name: String,
    #[serde(rename = "source_install_command", default)]
    pub install_command: String,
    pub install_mode: InstallMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_script_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_script_args: Vec<String>,
    pub base_image: String,
    pub output_image: String,
    /// RFC 3339.
    #[serde(rename = "installed_timestamp")]
    pub installed_at: String,
    #[serde(rename = "install_force", default)]
    pub force: bool,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
        return Err(ShimError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Shim scripts and their metadata on disk.
pub struct ShimStore {
    shim_dir: PathBuf,
    metadata_dir: PathBuf,
    env: Environment<'static>,
}

impl ShimStore {
    pub fn new(shim_dir: PathBuf, metadata_dir: PathBuf) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        env.add_filter("shell", |value: String| shell_quote(&value));
        Self {
            shim_dir,
            metadata_dir,
            env,
        }
    }

    pub fn shim_dir(&self) -> &Path {
        &self.shim_dir
    }

    pub fn shim_path(&self, binary: &str) -> PathBuf {
        self.shim_dir.join(binary)
    }

    pub fn metadata_path(&self, binary: &str) -> PathBuf {
        self.metadata_dir.join(format!("{}.json", binary))
    }

    pub fn render(&self, binary: &str, image: &str, tuprwre: &str) -> Result<String> {
        Ok(self.env.render_str(
            SHIM_TEMPLATE,
            context! { binary => binary, image => image, tuprwre => tuprwre },
        )?)
    }

    /// Write an executable shim for `binary`. Refuses to replace an existing
    /// shim unless `force` is set.
    pub fn create(&self, binary: &str, image: &str, tuprwre: &str, force: bool) -> Result<PathBuf> {
        validate_name(binary)?;
        let path = self.shim_path(binary);
        if path.symlink_metadata().is_ok() && !force {
            return Err(ShimError::AlreadyExists { path });
        }

        fs::create_dir_all(&self.shim_dir).map_err(io_err("failed to create", &self.shim_dir))?;
        let script = self.render(binary, image, tuprwre)?;

        // Write then rename so a running shim is never seen half-written.
        let tmp = self.shim_dir.join(format!(".{}.tmp", binary));
        fs::write(&tmp, script).map_err(io_err("failed to write", &tmp))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
                .map_err(io_err("failed to chmod", &tmp))?;
        }
        fs::rename(&tmp, &path).map_err(io_err("failed to install", &path))?;

        debug!(binary, image, path = %path.display(), "shim:created");
        Ok(path)
    }

    /// Shim names, sorted. A missing shim directory means no shims.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.shim_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("failed to read", &self.shim_dir)(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err("failed to read", &self.shim_dir))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_dir && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn save_metadata(&self, metadata: &ShimMetadata) -> Result<()> {
        validate_name(&metadata.binary_name)?;
        fs::create_dir_all(&self.metadata_dir)
            .map_err(io_err("failed to create", &self.metadata_dir))?;
        let path = self.metadata_path(&metadata.binary_name);
        let payload = serde_json::to_string_pretty(metadata).map_err(|source| ShimError::Metadata {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, payload).map_err(io_err("failed to write", &path))
    }

    pub fn load_metadata(&self, binary: &str) -> Result<ShimMetadata> {
        let path = self.metadata_path(binary);
        let payload = fs::read_to_string(&path).map_err(io_err("failed to read", &path))?;
        serde_json::from_str(&payload).map_err(|source| ShimError::Metadata { path, source })
    }

    /// Metadata for a shim if it was recorded and is readable.
    pub fn find_metadata(&self, binary: &str) -> Option<ShimMetadata> {
        match self.load_metadata(binary) {
            Ok(metadata) => Some(metadata),
            Err(ShimError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(binary, error = %e, "shim:unreadable metadata");
                None
            }
        }
    }

    /// Remove a shim and its metadata. Metadata that was never written is
    /// not an error.
    pub fn remove(&self, binary: &str) -> Result<()> {
        validate_name(binary)?;
        let path = self.shim_path(binary);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ShimError::NotFound(binary.to_string()));
            }
            Err(e) => return Err(io_err("failed to remove", &path)(e)),
        }

        let meta = self.metadata_path(binary);
        match fs::remove_file(&meta) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("failed to remove", &meta)(e)),
        }
        debug!(binary, "shim:removed");
        Ok(())
    }

    /// Remove every shim. Returns the names removed; the first failure is
    /// reported after attempting all of them.
    pub fn remove_all(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        let mut first_err = None;
        for name in self.list()? {
            match self.remove(&name) {
                Ok(()) => removed.push(name),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

/// Absolute, symlink-resolved path of the running executable, or plain
/// `tuprwre` to fall back on `PATH` lookup.
pub fn current_executable() -> String {
    std::env::current_exe()
        .ok()
        .map(|exe| fs::canonicalize(&exe).unwrap_or(exe))
        .map(|exe| exe.display().to_string())
        .unwrap_or_else(|| "tuprwre".to_string())
}

/// Whether `dir` is one of the entries of a `PATH`-style value.
pub fn dir_on_path(dir: &Path, path_var: &str) -> bool {
    std::env::split_paths(path_var).any(|entry| entry == dir)
}
