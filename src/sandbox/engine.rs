//! Container engine primitives used by the sandbox.
//!
//! The [`Engine`] trait is the seam between the orchestration logic and the
//! daemon. Production code talks to Docker through [`super::docker`]; tests
//! drive the orchestrator with a scripted engine.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::error::EngineError;
use super::resources::{HostResources, ResourcePolicy};

/// One demultiplexed chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Bytes),
    Stderr(Bytes),
}

pub type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputFrame, EngineError>> + Send>>;
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Streams opened by attaching to a container that has not started yet.
pub struct Attachment {
    pub output: OutputStream,
    pub input: InputSink,
}

/// Aborts a helper task when dropped.
pub struct TaskGuard(AbortHandle);

impl TaskGuard {
    pub fn new(handle: AbortHandle) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The two completion sources of a registered wait.
///
/// Exactly one of them resolves in a well-behaved engine. Both being closed
/// without a value is a protocol violation the orchestrator reports.
pub struct WaitRegistration {
    pub status: oneshot::Receiver<i64>,
    pub error: oneshot::Receiver<EngineError>,
    pub guard: Option<TaskGuard>,
}

/// Launch configuration for a new container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// `uid:gid` to run as.
    pub user: Option<String>,
    pub binds: Vec<String>,
    pub open_stdin: bool,
    pub read_only_rootfs: bool,
    /// Mount point and options, e.g. `("/tmp", "size=64m,noexec")`.
    pub tmpfs: Vec<(String, String)>,
    pub network_disabled: bool,
    pub resources: ResourcePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub created: i64,
}

/// Docker-Engine-compatible daemon operations.
///
/// Every call is a complete request/response unit keyed by container or
/// image id, so one engine may serve independent runs concurrently.
pub trait Engine: Send + Sync {
    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool, EngineError>> + Send;

    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Create a container without starting it. Returns the container id.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    fn attach(
        &self,
        id: &str,
        stdin: bool,
    ) -> impl Future<Output = Result<Attachment, EngineError>> + Send;

    /// Register interest in the container's next exit. Resolves once the
    /// daemon has acknowledged the registration, so it must be awaited
    /// before `start`.
    fn register_wait(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<WaitRegistration, EngineError>> + Send;

    fn start(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Force-remove a container together with its anonymous volumes.
    fn remove_container(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn commit(
        &self,
        id: &str,
        repo: &str,
        tag: &str,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn host_resources(&self) -> impl Future<Output = Result<HostResources, EngineError>> + Send;

    /// Exit code of a container that has stopped, `None` while it runs.
    fn exit_status(&self, id: &str)
    -> impl Future<Output = Result<Option<i64>, EngineError>> + Send;

    /// Environment of a created container, as `KEY=VALUE` entries.
    fn container_env(&self, id: &str)
    -> impl Future<Output = Result<Vec<String>, EngineError>> + Send;

    /// Run a command in a started container and collect its stdout.
    fn exec_stdout(
        &self,
        id: &str,
        cmd: Vec<String>,
    ) -> impl Future<Output = Result<Vec<u8>, EngineError>> + Send;

    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerRecord>, EngineError>> + Send;

    fn list_images(&self) -> impl Future<Output = Result<Vec<ImageRecord>, EngineError>> + Send;

    fn remove_image(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;
}
