//! Finding the binaries an install added to an image.
//!
//! The executables on `PATH` are listed in both the base image and the
//! committed image; whatever is new is a candidate for a shim, minus common
//! system tools that would shadow the host's own.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::sandbox::{Engine, Result, Sandbox, SandboxError};

/// Names never shimmed, even when an install puts them on `PATH`.
const SYSTEM_BINARIES: &[&str] = &[
    "sh", "bash", "zsh", "ls", "cat", "grep", "awk", "sed", "curl", "wget", "tar", "gzip", "[",
    "test", "[[",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    /// Last path segment, e.g. `jq`.
    pub name: String,
    /// Full path inside the image, e.g. `/usr/bin/jq`.
    pub path: String,
    pub version: Option<String>,
}

impl Binary {
    pub fn from_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            name,
            path: path.to_string(),
            version: None,
        }
    }
}

/// Paths in `current` that are not in `baseline`, keeping `current`'s order.
pub fn difference(current: &[String], baseline: &[String]) -> Vec<String> {
    let baseline: HashSet<&str> = baseline.iter().map(String::as_str).collect();
    current
        .iter()
        .filter(|path| !baseline.contains(path.as_str()))
        .cloned()
        .collect()
}

/// Drop excluded system tools and names that do not start with an ASCII
/// letter or digit.
pub fn filter_system_binaries(binaries: Vec<Binary>) -> Vec<Binary> {
    binaries
        .into_iter()
        .filter(|b| {
            b.name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
                && !SYSTEM_BINARIES.contains(&b.name.as_str())
        })
        .collect()
}

/// Diff two executable listings into shimmable binaries.
pub fn new_binaries(current: &[String], baseline: &[String]) -> Vec<Binary> {
    let added: Vec<Binary> = difference(current, baseline)
        .iter()
        .map(|path| Binary::from_path(path))
        .collect();
    filter_system_binaries(added)
}

pub struct Discoverer<'a, E> {
    sandbox: &'a Sandbox<E>,
}

impl<'a, E: Engine> Discoverer<'a, E> {
    pub fn new(sandbox: &'a Sandbox<E>) -> Self {
        Self { sandbox }
    }

    /// Binaries present in `new_image` but not in `base_image`.
    pub async fn discover(&self, base_image: &str, new_image: &str) -> Result<Vec<Binary>> {
        let baseline = self.sandbox.list_image_executables(base_image).await?;
        let current = self.sandbox.list_image_executables(new_image).await?;

        let binaries = new_binaries(&current, &baseline);
        info!(
            base_image,
            new_image,
            baseline = baseline.len(),
            current = current.len(),
            found = binaries.len(),
            "discovery:diffed images"
        );
        for binary in &binaries {
            debug!(name = %binary.name, path = %binary.path, "discovery:new binary");
        }
        Ok(binaries)
    }

    /// Diffing container filesystems directly is not supported.
    pub async fn discover_from_filesystem_diff(
        &self,
        _container_id: &str,
        _base_image: &str,
    ) -> Result<Vec<Binary>> {
        Err(SandboxError::NotImplemented("filesystem diff"))
    }

    pub async fn binary_version(&self, _binary_path: &str, _container_id: &str) -> Result<String> {
        Err(SandboxError::NotImplemented("binary version detection"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::{FakeEngine, Script};

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn names(binaries: &[Binary]) -> Vec<&str> {
        binaries.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn test_difference_basic() {
        let current = paths(&["/usr/bin/a", "/usr/bin/b", "/usr/bin/c"]);
        let baseline = paths(&["/usr/bin/a", "/usr/bin/b"]);
        assert_eq!(difference(&current, &baseline), vec!["/usr/bin/c"]);
    }

    #[test]
    fn test_difference_identical_is_empty() {
        let listing = paths(&["/usr/bin/a", "/usr/bin/b"]);
        assert!(difference(&listing, &listing).is_empty());
    }

    #[test]
    fn test_difference_edge_cases() {
        let some = paths(&["/usr/bin/a"]);
        assert_eq!(difference(&some, &[]), vec!["/usr/bin/a"]);
        assert!(difference(&[], &some).is_empty());
        assert_eq!(difference(&paths(&["/usr/bin/x", "/usr/bin/y"]), &some).len(), 2);
    }

    #[test]
    fn test_difference_compares_full_paths() {
        let current = paths(&["/usr/local/bin/tool"]);
        let baseline = paths(&["/usr/bin/tool"]);
        assert_eq!(difference(&current, &baseline), vec!["/usr/local/bin/tool"]);
    }

    #[test]
    fn test_filter_removes_system_binaries() {
        let input = [
            "/bin/sh",
            "/bin/bash",
            "/usr/local/bin/jq",
            "/usr/bin/curl",
            "/usr/local/bin/ripgrep",
        ]
        .iter()
        .map(|p| Binary::from_path(p))
        .collect();
        assert_eq!(names(&filter_system_binaries(input)), vec!["jq", "ripgrep"]);
    }

    #[test]
    fn test_filter_drops_non_alphanumeric_names() {
        let input = [
            "/usr/bin/[",
            "/usr/bin/_helper",
            "/usr/bin/.hidden",
            "/usr/bin/7z",
            "/usr/bin/X11",
        ]
        .iter()
        .map(|p| Binary::from_path(p))
        .collect();
        assert_eq!(names(&filter_system_binaries(input)), vec!["7z", "X11"]);
    }

    #[test]
    fn test_filter_empty_and_all_system() {
        assert!(filter_system_binaries(Vec::new()).is_empty());
        let input = ["/bin/sh", "/bin/bash", "/usr/bin/curl", "/usr/bin/test"]
            .iter()
        .map(|p| Binary::from_path(p))
        .collect();
        assert!(filter_system_binaries(input).is_empty());
    }

    #[test]
    fn test_binary_from_path() {
        let b = Binary::from_path("/usr/local/bin/jq");
        assert_eq!(b.name, "jq");
        assert_eq!(b.path, "/usr/local/bin/jq");
        assert_eq!(b.version, None);
    }

    #[test]
    fn test_new_binaries_disjoint_listing() {
        let current = paths(&["/usr/bin/jq", "/usr/bin/curl", "/usr/bin/yq"]);
        let found = new_binaries(&current, &paths(&["/bin/ls"]));
        assert_eq!(names(&found), vec!["jq", "yq"]);
    }

    #[tokio::test]
    async fn test_discover_jq_install() {
        let base = "/bin/bash\n/bin/ls\n/usr/bin/apt\n";
        let installed = "/bin/bash\n/bin/ls\n/usr/bin/apt\n/usr/bin/jq\n/usr/bin/curl\n";
        let engine = FakeEngine::new(Script::exit(0))
            .with_exec_output("ubuntu:22.04", base)
            .with_exec_output("tuprwre-20240101-000000-deadbeef", installed);
        let sandbox = Sandbox::new(engine.clone());

        let found = Discoverer::new(&sandbox)
            .discover("ubuntu:22.04", "tuprwre-20240101-000000-deadbeef")
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "jq");
        assert_eq!(found[0].path, "/usr/bin/jq");
        // One inspection container per image, both removed.
        assert_eq!(engine.removed().len(), 2);
    }

    #[tokio::test]
    async fn test_unimplemented_strategies_fail_fast() {
        let sandbox = Sandbox::new(FakeEngine::new(Script::exit(0)));
        let discoverer = Discoverer::new(&sandbox);

        let err = discoverer
            .discover_from_filesystem_diff("abc", "ubuntu:22.04")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotImplemented(_)));
        assert!(err.to_string().contains("not implemented"));

        let err = discoverer.binary_version("/usr/bin/jq", "abc").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotImplemented(_)));
    }
}
