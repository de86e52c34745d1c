//! [`Engine`] implementation backed by the Docker Engine API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions,
    InspectContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, Empty};
use hyper::header::HOST;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::UnixStream;
use tokio::sync::{OnceCell, oneshot};
use tracing::{debug, info};

use super::engine::{
    Attachment, ContainerRecord, ContainerSpec, Engine, ImageRecord, OutputFrame, OutputStream,
    TaskGuard, WaitRegistration,
};
use super::error::{EngineError, SandboxError};
use super::resources::HostResources;

const PING_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
const COMMIT_AUTHOR: &str = "tuprwre";
const COMMIT_COMMENT: &str = "tuprwre installation commit";

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;
        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            Error::DockerResponseServerError { message, .. } => EngineError::Api(message),
            Error::IOError { err } => EngineError::Io(err),
            other => EngineError::Api(other.to_string()),
        }
    }
}

/// A connected Docker daemon client. Cheap to clone.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    /// Local daemon socket, used for waits that need the response head.
    socket: Option<PathBuf>,
}

impl DockerEngine {
    /// Connect using the environment (`DOCKER_HOST` or the local socket) and
    /// make sure the daemon answers.
    pub async fn connect() -> Result<Self, SandboxError> {
        let unreachable = |e: &dyn std::fmt::Display| {
            debug!(error = %e, "docker:connect failed");
            SandboxError::engine("connect", EngineError::Unreachable(e.to_string()))
        };

        let docker = Docker::connect_with_local_defaults().map_err(|e| unreachable(&e))?;
        match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(unreachable(&e)),
            Err(e) => return Err(unreachable(&e)),
        }
        let socket = unix_socket(std::env::var("DOCKER_HOST").ok().as_deref());
        debug!(socket = ?socket, "docker:connected");
        Ok(Self { docker, socket })
    }

    /// Version string the daemon reports, empty when it reports none.
    pub async fn server_version(&self) -> Result<String, EngineError> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_default())
    }
}

/// Socket path behind `DOCKER_HOST`, or `None` for non-unix hosts.
fn unix_socket(docker_host: Option<&str>) -> Option<PathBuf> {
    match docker_host.map(str::trim) {
        None | Some("") => Some(PathBuf::from(DEFAULT_SOCKET)),
        Some(host) => host.strip_prefix("unix://").map(PathBuf::from),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitBody {
    status_code: i64,
    #[serde(default)]
    error: Option<WaitBodyError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitBodyError {
    #[serde(default)]
    message: String,
}

/// `message` of a daemon error body, or the body itself.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

fn http_error(err: impl std::fmt::Display) -> EngineError {
    EngineError::Api(err.to_string())
}

/// Register a `next-exit` wait over a dedicated connection.
///
/// The daemon writes the response head only after the wait is in place, so
/// returning once the head has arrived means `start` cannot overtake it.
async fn wait_on_socket(socket: &Path, id: &str) -> Result<WaitRegistration, EngineError> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| EngineError::Unreachable(format!("{}: {}", socket.display(), e)))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(http_error)?;
    let conn_task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "docker:wait connection closed");
        }
    });
    let conn_guard = TaskGuard::new(conn_task.abort_handle());

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/containers/{}/wait?condition=next-exit", id))
        .header(HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(http_error)?;
    let response = sender.send_request(request).await.map_err(http_error)?;

    let code = response.status();
    if !code.is_success() {
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => Bytes::new(),
        };
        let message = error_message(&body);
        return Err(if code == StatusCode::NOT_FOUND {
            EngineError::NotFound(message)
        } else {
            EngineError::Api(message)
        });
    }
    debug!(container = id, "docker:wait registered");

    let (status_tx, status) = oneshot::channel();
    let (error_tx, error) = oneshot::channel();
    let task = tokio::spawn(async move {
        let _conn = conn_guard;
        let _sender = sender;
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let _ = error_tx.send(http_error(e));
                return;
            }
        };
        match serde_json::from_slice::<WaitBody>(&body) {
            Ok(WaitBody {
                error: Some(WaitBodyError { message }),
                ..
            }) if !message.is_empty() => {
                let _ = error_tx.send(EngineError::Api(message));
            }
            Ok(wait) => {
                let _ = status_tx.send(wait.status_code);
            }
            Err(e) => {
                let _ = error_tx.send(EngineError::Api(format!("malformed wait response: {}", e)));
            }
        }
    });

    Ok(WaitRegistration {
        status,
        error,
        guard: Some(TaskGuard::new(task.abort_handle())),
    })
}

/// Lazily established, process-wide engine connection.
///
/// The first caller connects; everyone else reuses that client. A failed
/// attempt is not cached, so a later call may succeed once the daemon is up.
#[derive(Default)]
pub struct EngineConnector {
    engine: OnceCell<DockerEngine>,
}

impl EngineConnector {
    pub const fn new() -> Self {
        Self {
            engine: OnceCell::const_new(),
        }
    }

    pub async fn get(&self) -> Result<DockerEngine, SandboxError> {
        self.engine
            .get_or_try_init(DockerEngine::connect)
            .await
            .cloned()
    }
}

/// Split `name[:tag]` for the pull API. Digests are passed through whole.
fn pull_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => (&image[..idx], &image[idx + 1..]),
        _ => (image, "latest"),
    }
}

fn create_config(spec: &ContainerSpec) -> Config<String> {
    let mut host_config = HostConfig {
        auto_remove: Some(false),
        readonly_rootfs: spec.read_only_rootfs.then_some(true),
        ..Default::default()
    };
    if !spec.binds.is_empty() {
        host_config.binds = Some(spec.binds.clone());
    }
    if !spec.tmpfs.is_empty() {
        host_config.tmpfs = Some(spec.tmpfs.iter().cloned().collect::<HashMap<_, _>>());
    }
    spec.resources.apply(&mut host_config);

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        tty: Some(false),
        attach_stdin: Some(spec.open_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(spec.open_stdin),
        stdin_once: Some(spec.open_stdin),
        network_disabled: spec.network_disabled.then_some(true),
        host_config: Some(host_config),
        ..Default::default()
    }
}

impl Engine for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match EngineError::from(e) {
                EngineError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let (from_image, tag) = pull_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(status) = update.status {
                debug!(image, status = %status, "docker:pull progress");
            }
        }
        info!(image, "docker:pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), create_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "docker:create warning");
        }
        Ok(response.id)
    }

    async fn attach(&self, id: &str, stdin: bool) -> Result<Attachment, EngineError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(stdin),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };
        let results = self.docker.attach_container(id, Some(options)).await?;

        let output: OutputStream = Box::pin(results.output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputFrame::Stdout(message)))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(message))),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(EngineError::from(e))),
            }
        }));

        Ok(Attachment {
            output,
            input: results.input,
        })
    }

    async fn register_wait(&self, id: &str) -> Result<WaitRegistration, EngineError> {
        if let Some(socket) = &self.socket {
            return wait_on_socket(socket, id).await;
        }

        // Remote daemons go through bollard, which gives no signal when the
        // request is on the wire. The orchestrator polls the exit status
        // once the output stream ends to cover a wait that arrived late.
        let (status_tx, status) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        let (registered_tx, registered) = oneshot::channel::<()>();

        let docker = self.docker.clone();
        let container = id.to_string();
        let task = tokio::spawn(async move {
            let options = WaitContainerOptions {
                condition: "next-exit",
            };
            let mut wait = Box::pin(docker.wait_container(&container, Some(options)));
            let first = futures::future::poll_fn(|cx| {
                let polled = wait.poll_next_unpin(cx);
                std::task::Poll::Ready(polled)
            })
            .await;
            let _ = registered_tx.send(());

            let next = match first {
                std::task::Poll::Ready(item) => item,
                std::task::Poll::Pending => wait.next().await,
            };
            match next {
                Some(Ok(response)) => {
                    let _ = status_tx.send(response.status_code);
                }
                // Non-zero exits arrive as an error carrying the code.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    let _ = status_tx.send(code);
                }
                Some(Err(e)) => {
                    let _ = error_tx.send(EngineError::from(e));
                }
                None => {}
            }
        });
        let guard = TaskGuard::new(task.abort_handle());

        registered
            .await
            .map_err(|_| EngineError::Api(format!("wait registration for {} was lost", id)))?;
        debug!(container = id, "docker:wait requested");

        Ok(WaitRegistration {
            status,
            error,
            guard: Some(guard),
        })
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker.start_container::<String>(id, None).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn commit(&self, id: &str, repo: &str, tag: &str) -> Result<(), EngineError> {
        let options = CommitContainerOptions {
            container: id,
            repo,
            tag,
            comment: COMMIT_COMMENT,
            author: COMMIT_AUTHOR,
            pause: true,
            changes: None,
        };
        let commit = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await?;
        debug!(container = id, image = ?commit.id, "docker:commit");
        Ok(())
    }

    async fn host_resources(&self) -> Result<HostResources, EngineError> {
        let info = self.docker.info().await?;
        Ok(HostResources {
            memory_total: info.mem_total.unwrap_or(0),
            cpu_count: info.ncpu.unwrap_or(0),
        })
    }

    async fn exit_status(&self, id: &str) -> Result<Option<i64>, EngineError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let Some(state) = inspect.state else {
            return Ok(None);
        };
        match state.status {
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
                Ok(Some(state.exit_code.unwrap_or(0)))
            }
            _ => Ok(None),
        }
    }

    async fn container_env(&self, id: &str) -> Result<Vec<String>, EngineError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect.config.and_then(|c| c.env).unwrap_or_default())
    }

    async fn exec_stdout(&self, id: &str, cmd: Vec<String>) -> Result<Vec<u8>, EngineError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(false),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await?;

        let mut collected = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.try_next().await? {
                if let LogOutput::StdOut { message } | LogOutput::Console { message } = chunk {
                    collected.extend_from_slice(&message);
                }
            }
        }
        Ok(collected)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .map(|c| ContainerRecord {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self.docker.list_images(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .map(|i| ImageRecord {
                id: i.id,
                repo_tags: i.repo_tags,
                size: i.size,
                created: i.created,
            })
            .collect())
    }

    async fn remove_image(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveImageOptions {
            force: false,
            noprune: false,
        };
        self.docker.remove_image(id, Some(options), None).await?;
        Ok(())
    }
}
