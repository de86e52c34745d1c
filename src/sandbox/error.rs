//! Error taxonomy for sandboxed execution.

use std::path::PathBuf;

/// Failure reported by a container engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The daemon socket could not be reached.
    #[error("container engine unreachable: {0}")]
    Unreachable(String),

    /// The referenced container or image does not exist.
    #[error("no such object: {0}")]
    NotFound(String),

    /// The daemon answered with an error.
    #[error("{0}")]
    Api(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Step of the container lifecycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Create,
    Attach,
    Wait,
    Start,
    Inspect,
    Exec,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecyclePhase::Create => "create",
            LifecyclePhase::Attach => "attach",
            LifecyclePhase::Wait => "wait",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Inspect => "inspect",
            LifecyclePhase::Exec => "exec",
        };
        f.write_str(name)
    }
}

/// Resource specification could not be turned into a policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid {resource} percentage {input:?}: must be greater than 0% and at most 100%")]
    InvalidPercentage {
        resource: &'static str,
        input: String,
    },

    #[error("invalid {resource} value {input:?}")]
    InvalidAbsoluteValue {
        resource: &'static str,
        input: String,
    },

    #[error("cannot resolve {resource} percentage: host {resource} info unavailable")]
    HostInfoUnavailable { resource: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Docker daemon is not running or unreachable. {hint}")]
    EngineUnreachable { hint: String },

    #[error("failed to pull image {image}: {source}")]
    ImagePullFailed {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to {phase} container {container}: {source}")]
    ContainerLifecycle {
        phase: LifecyclePhase,
        container: String,
        #[source]
        source: EngineError,
    },

    #[error("container {container} wait channels closed without status")]
    WaitChannelsClosedWithoutStatus { container: String },

    #[error("container {container} exited with code {code}")]
    NonZeroExit { container: String, code: i64 },

    #[error("run cancelled")]
    Cancelled { container: Option<String> },

    #[error("failed to commit container {container} to {image}: {source}")]
    CommitFailed {
        container: String,
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to remove container {container}: {source}")]
    CleanupFailed {
        container: String,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("{0} not implemented")]
    NotImplemented(&'static str),

    #[error("failed to create capture file {}: {source}", path.display())]
    CaptureFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: EngineError,
    },
}

impl SandboxError {
    /// True when the run stopped because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SandboxError::Cancelled { .. })
    }

    pub(crate) fn lifecycle(
        phase: LifecyclePhase,
        container: impl Into<String>,
        source: EngineError,
    ) -> Self {
        SandboxError::ContainerLifecycle {
            phase,
            container: container.into(),
            source,
        }
    }

    pub(crate) fn engine(context: impl Into<String>, source: EngineError) -> Self {
        match source {
            EngineError::Unreachable(_) => SandboxError::EngineUnreachable {
                hint: start_hint().to_string(),
            },
            source => SandboxError::Engine {
                context: context.into(),
                source,
            },
        }
    }
}

/// How to get the daemon running on this platform.
pub fn start_hint() -> &'static str {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        "Start Docker Desktop and retry."
    } else {
        "Start Docker and retry (for example: 'systemctl start docker')."
    }
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_message_includes_code() {
        let err = SandboxError::NonZeroExit {
            container: "abc".to_string(),
            code: 7,
        };
        assert!(err.to_string().contains("exited with code 7"));
    }

    #[test]
    fn unreachable_engine_errors_become_engine_unreachable() {
        let err = SandboxError::engine("list images", EngineError::Unreachable("no socket".into()));
        assert!(matches!(err, SandboxError::EngineUnreachable { .. }));
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(SandboxError::Cancelled { container: None }.is_cancelled());
        assert!(!SandboxError::NotImplemented("filesystem diff").is_cancelled());
    }
}
