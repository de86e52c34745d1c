//! Execution session orchestration.
//!
//! One session drives one container through
//! create → attach → register wait → start → drain → observe exit → cleanup.
//! Attach and wait registration both happen before start so that neither
//! early output nor a fast exit can be missed, and the exit code is only
//! returned once the output stream has been fully drained.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::diagnostics::{DiagnosticSink, Diagnostics, DiagnosticsMode, LifecycleEvent};
use super::engine::{
    Attachment, ContainerSpec, Engine, InputSink, OutputFrame, OutputStream, WaitRegistration,
};
use super::error::{EngineError, LifecyclePhase, Result, SandboxError};
use super::resources::{self, ResourcePolicy, ResourceSpec};

pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;
pub type InputSource = Box<dyn AsyncRead + Send + Unpin>;

/// Writable scratch space for containers with a read-only root filesystem.
const TMPFS_MOUNT: (&str, &str) = ("/tmp", "size=64m,noexec");
const COMMIT_TAG: &str = "latest";
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
/// How often to ask for the exit code once output has ended without the
/// wait resolving.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Inputs for proxying one binary invocation into a fresh container.
pub struct RunRequest {
    pub image: String,
    pub binary: String,
    pub args: Vec<String>,
    pub workdir: Option<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Bind specs in `host:container[:ro]` form.
    pub volumes: Vec<String>,
    /// `uid:gid` to run as inside the container.
    pub user: Option<String>,
    pub stdin: Option<InputSource>,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
    /// Receives stdout and stderr interleaved as delivered.
    pub capture_file: Option<PathBuf>,
    pub network_disabled: bool,
    pub resources: ResourceSpec,
    pub diagnostics: DiagnosticsMode,
    /// Diagnostic sink; process stderr when unset.
    pub diagnostic_sink: Option<DiagnosticSink>,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(image: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            binary: binary.into(),
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            volumes: Vec::new(),
            user: None,
            stdin: None,
            stdout: None,
            stderr: None,
            capture_file: None,
            network_disabled: false,
            resources: ResourceSpec::default(),
            diagnostics: DiagnosticsMode::default(),
            diagnostic_sink: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of one run, whatever path it took.
pub struct ExecutionResult {
    pub container_id: Option<String>,
    pub events: Vec<LifecycleEvent>,
    pub outcome: Result<i64>,
}

impl ExecutionResult {
    pub fn into_result(self) -> Result<i64> {
        self.outcome
    }
}

/// Live state of one container run.
struct Session {
    container_id: String,
    events: Vec<LifecycleEvent>,
    diagnostics: Diagnostics,
}

impl Session {
    fn new(container_id: String, mut diagnostics: Diagnostics) -> Self {
        diagnostics.set_container(&container_id);
        Self {
            container_id,
            events: Vec::new(),
            diagnostics,
        }
    }

    fn record(&mut self, event: LifecycleEvent, details: Option<Map<String, Value>>) {
        debug!(
            container = %short_id(&self.container_id),
            run_id = self.diagnostics.run_id(),
            event = event.as_str(),
            "sandbox:lifecycle"
        );
        self.events.push(event);
        self.diagnostics.emit(event, details);
    }
}

/// Drives containers on a connected engine.
pub struct Sandbox<E> {
    engine: E,
}

impl<E: Engine> Sandbox<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Make sure `image` is present locally, pulling it when missing.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        self.ensure_image_or_cancel(image, &CancellationToken::new()).await
    }

    async fn ensure_image_or_cancel(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match until_cancelled(cancel, self.engine.image_exists(image)).await? {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e @ EngineError::Unreachable(_)) => {
                return Err(SandboxError::engine("inspect image", e));
            }
            Err(e) => debug!(image, error = %e, "sandbox:image inspect failed, pulling"),
        }

        info!(image, "sandbox:pulling image");
        eprintln!("Pulling image {}...", image);
        until_cancelled(cancel, self.engine.pull_image(image))
            .await?
            .map_err(|source| match source {
                EngineError::Unreachable(_) => SandboxError::engine("pull image", source),
                source => SandboxError::ImagePullFailed {
                    image: image.to_string(),
                    source,
                },
            })
    }

    /// Resolve a resource spec, querying host totals only for percentages.
    pub async fn resolve_resources(
        &self,
        spec: &ResourceSpec,
        cancel: &CancellationToken,
    ) -> Result<ResourcePolicy> {
        let resolved = until_cancelled(
            cancel,
            resources::resolve_against_live_host(&self.engine, spec),
        )
        .await?;
        Ok(resolved?)
    }

    /// Run an install command in a fresh container from `image`, streaming
    /// its output to this process's stdout/stderr.
    ///
    /// On success the container is left in place for [`Sandbox::commit`];
    /// on any failure it has already been removed.
    pub async fn run_install(
        &self,
        image: &str,
        command: &str,
        resources: ResourcePolicy,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.install_into(
            image,
            command,
            resources,
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
            cancel,
        )
        .await
    }

    async fn install_into(
        &self,
        image: &str,
        command: &str,
        resources: ResourcePolicy,
        stdout: OutputSink,
        stderr: OutputSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.ensure_image_or_cancel(image, cancel).await?;

        let spec = ContainerSpec {
            name: container_name("tuprwre"),
            image: image.to_string(),
            cmd: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
            resources,
            ..Default::default()
        };
        let id = self.create(&spec, cancel).await?;
        info!(container = %short_id(&id), image, "sandbox:install container created");

        let mut session = Session::new(id.clone(), Diagnostics::disabled());
        session.record(LifecycleEvent::Create, None);

        let sinks = OutputSinks::new(stdout, stderr, None);
        let outcome = self.drive(&mut session, None, sinks, cancel).await;

        match outcome {
            Ok(0) => Ok(id),
            Ok(code) => {
                self.cleanup_quietly(&id).await;
                Err(SandboxError::NonZeroExit {
                    container: id,
                    code,
                })
            }
            Err(e) => {
                self.cleanup_quietly(&id).await;
                Err(e)
            }
        }
    }

    /// Run a binary in a fresh, locked-down container and return its exit
    /// code. A non-zero exit is a successful run.
    pub async fn run(&self, request: RunRequest) -> Result<i64> {
        self.execute(request).await.into_result()
    }

    /// Like [`Sandbox::run`], also reporting the container id and the
    /// lifecycle events the run went through.
    pub async fn execute(&self, request: RunRequest) -> ExecutionResult {
        let RunRequest {
            image,
            binary,
            args,
            workdir,
            env,
            volumes,
            user,
            stdin,
            stdout,
            stderr,
            capture_file,
            network_disabled,
            resources,
            diagnostics,
            diagnostic_sink,
            cancel,
        } = request;

        let early = |outcome: Result<i64>| ExecutionResult {
            container_id: None,
            events: Vec::new(),
            outcome,
        };

        let sink = match diagnostic_sink {
            Some(sink) => Some(sink),
            None if diagnostics.is_enabled() => {
                let stderr: DiagnosticSink =
                    std::sync::Arc::new(std::sync::Mutex::new(std::io::stderr()));
                Some(stderr)
            }
            None => None,
        };
        let diag = Diagnostics::new(diagnostics, sink, Uuid::new_v4().to_string());

        // Validated before anything exists on the daemon.
        let policy = match self.resolve_resources(&resources, &cancel).await {
            Ok(policy) => policy,
            Err(e) => return early(Err(e)),
        };
        if let Err(e) = self.ensure_image_or_cancel(&image, &cancel).await {
            return early(Err(e));
        }

        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(binary.clone());
        cmd.extend(args);

        let spec = ContainerSpec {
            name: container_name("tuprwre"),
            image: image.clone(),
            cmd,
            env,
            working_dir: workdir,
            user,
            binds: volumes,
            open_stdin: stdin.is_some(),
            read_only_rootfs: true,
            tmpfs: vec![(TMPFS_MOUNT.0.to_string(), TMPFS_MOUNT.1.to_string())],
            network_disabled,
            resources: policy,
        };

        let id = match self.create(&spec, &cancel).await {
            Ok(id) => id,
            Err(e) => return early(Err(e)),
        };
        debug!(container = %short_id(&id), image, binary, "sandbox:run container created");

        let mut session = Session::new(id.clone(), diag);
        session.record(LifecycleEvent::Create, None);

        let outcome = self
            .run_created(&mut session, stdin, stdout, stderr, capture_file, &cancel)
            .await;

        session.record(LifecycleEvent::Cleanup, None);
        self.cleanup_quietly(&id).await;

        ExecutionResult {
            container_id: Some(id),
            events: session.events,
            outcome,
        }
    }

    async fn run_created(
        &self,
        session: &mut Session,
        stdin: Option<InputSource>,
        stdout: Option<OutputSink>,
        stderr: Option<OutputSink>,
        capture_file: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let stdout = stdout.unwrap_or_else(|| Box::new(tokio::io::sink()));
        let stderr = stderr.unwrap_or_else(|| Box::new(tokio::io::sink()));

        let capture = match capture_file {
            Some(path) => {
                let file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|source| SandboxError::CaptureFile {
                        path: path.clone(),
                        source,
                    })?;
                Some(CaptureWriter::spawn(file, path))
            }
            None => None,
        };

        let sinks = OutputSinks::new(stdout, stderr, capture.as_ref().map(|c| c.sender()));
        let outcome = self.drive(session, stdin, sinks, cancel).await;

        if let Some(capture) = capture {
            capture.finish().await;
        }
        outcome
    }

    /// Attach, register the wait, start, and observe the exit of an already
    /// created container.
    async fn drive(
        &self,
        session: &mut Session,
        stdin: Option<InputSource>,
        sinks: OutputSinks,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let id = session.container_id.clone();

        let Attachment { output, input } = guarded(
            cancel,
            &id,
            LifecyclePhase::Attach,
            self.engine.attach(&id, stdin.is_some()),
        )
        .await?;
        session.record(LifecycleEvent::Attach, None);

        let mut drain = DrainLatch::spawn(output, sinks);
        let mut forwarder: Option<ScopedTask> = None;

        let outcome: Result<i64> = async {
            let registration = guarded(
                cancel,
                &id,
                LifecyclePhase::Wait,
                self.engine.register_wait(&id),
            )
            .await?;
            session.record(LifecycleEvent::WaitRegistered, None);

            guarded(cancel, &id, LifecyclePhase::Start, self.engine.start(&id)).await?;
            session.record(LifecycleEvent::Start, None);

            if let Some(source) = stdin {
                forwarder = Some(forward_stdin(source, input));
            }

            self.observe_exit(session, registration, &mut drain, cancel)
                .await
        }
        .await;

        // No-op when the stream already reached EOF.
        drain.force_close_and_wait(session).await;
        if let Some(task) = forwarder {
            task.shutdown().await;
        }
        outcome
    }

    async fn observe_exit(
        &self,
        session: &mut Session,
        registration: WaitRegistration,
        drain: &mut DrainLatch,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let id = session.container_id.clone();
        let WaitRegistration {
            status,
            error,
            guard: _guard,
        } = registration;
        let mut status = Some(status);
        let mut error = Some(error);
        let eof = drain.eof();

        let code = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.record(LifecycleEvent::WaitExit, Some(detail("cancelled", true)));
                    return Err(SandboxError::Cancelled { container: Some(id) });
                }
                received = next_or_pending(&mut error) => match received {
                    Some(source) => {
                        session.record(
                            LifecycleEvent::WaitExit,
                            Some(detail("error", source.to_string())),
                        );
                        return Err(SandboxError::lifecycle(LifecyclePhase::Wait, id, source));
                    }
                    None => {
                        error = None;
                        if status.is_none() {
                            return Err(SandboxError::WaitChannelsClosedWithoutStatus {
                                container: id,
                            });
                        }
                    }
                },
                received = next_or_pending(&mut status) => match received {
                    Some(code) => {
                        session.record(LifecycleEvent::WaitExit, Some(detail("status_code", code)));
                        break code;
                    }
                    None => {
                        status = None;
                        if error.is_none() {
                            return Err(SandboxError::WaitChannelsClosedWithoutStatus {
                                container: id,
                            });
                        }
                    }
                },
                code = exit_after_eof(&self.engine, &id, &eof) => {
                    debug!(container = %short_id(&id), code, "sandbox:exit observed by inspect");
                    let mut details = detail("status_code", code);
                    details.insert("source".to_string(), Value::from("inspect"));
                    session.record(LifecycleEvent::WaitExit, Some(details));
                    break code;
                }
            }
        };

        tokio::select! {
            _ = drain.wait(session) => Ok(code),
            _ = cancel.cancelled() => Err(SandboxError::Cancelled { container: Some(id) }),
        }
    }

    pub(super) async fn create(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let created = until_cancelled(cancel, self.engine.create_container(spec)).await?;
        created.map_err(|source| match source {
            EngineError::Unreachable(_) => SandboxError::engine("create container", source),
            source => SandboxError::lifecycle(LifecyclePhase::Create, spec.name.clone(), source),
        })
    }

    /// Snapshot a container into `image_name` (`repo[:tag]`).
    pub async fn commit(&self, container_id: &str, image_name: &str) -> Result<()> {
        let (repo, tag) = split_image_name(image_name);
        self.engine
            .commit(container_id, repo, tag)
            .await
            .map_err(|source| SandboxError::CommitFailed {
                container: container_id.to_string(),
                image: image_name.to_string(),
                source,
            })?;
        info!(container = %short_id(container_id), image = image_name, "sandbox:committed");
        Ok(())
    }

    /// Force-remove a container and its volumes. Removing a container that
    /// is already gone succeeds.
    pub async fn cleanup(&self, container_id: &str) -> Result<()> {
        match self.engine.remove_container(container_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(container = %short_id(container_id), "sandbox:container already removed");
                Ok(())
            }
            Err(source) => Err(SandboxError::CleanupFailed {
                container: container_id.to_string(),
                source,
            }),
        }
    }

    /// Cleanup whose failure is only logged.
    pub async fn cleanup_quietly(&self, container_id: &str) {
        match tokio::time::timeout(CLEANUP_TIMEOUT, self.cleanup(container_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "sandbox:cleanup failed"),
            Err(_) => warn!(container = %short_id(container_id), "sandbox:cleanup timed out"),
        }
    }
}

/// Await an engine call unless the caller cancels first.
async fn guarded<T>(
    cancel: &CancellationToken,
    container: &str,
    phase: LifecyclePhase,
    call: impl Future<Output = std::result::Result<T, EngineError>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SandboxError::Cancelled {
            container: Some(container.to_string()),
        }),
        result = call => result.map_err(|source| SandboxError::lifecycle(phase, container, source)),
    }
}

/// Await `call` unless the caller cancels first. Used before a container
/// exists, so there is none to report.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SandboxError::Cancelled { container: None }),
        value = call => Ok(value),
    }
}

/// Once the output stream has ended, poll the engine for the exit code
/// until the container is seen stopped. Covers a wait that never resolves.
async fn exit_after_eof<E: Engine>(engine: &E, id: &str, eof: &CancellationToken) -> i64 {
    eof.cancelled().await;
    loop {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        match engine.exit_status(id).await {
            Ok(Some(code)) => return code,
            Ok(None) => {}
            Err(e) => {
                debug!(container = %short_id(id), error = %e, "sandbox:exit status query failed")
            }
        }
    }
}

/// Resolve with the channel's value, `None` once it is closed, or never when
/// the slot has already been consumed.
async fn next_or_pending<T>(slot: &mut Option<oneshot::Receiver<T>>) -> Option<T> {
    match slot {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

fn detail(key: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value.into());
    map
}

/// Destinations for demultiplexed output.
struct OutputSinks {
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    capture: Option<mpsc::UnboundedSender<Bytes>>,
}

impl OutputSinks {
    fn new(
        stdout: OutputSink,
        stderr: OutputSink,
        capture: Option<mpsc::UnboundedSender<Bytes>>,
    ) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            capture,
        }
    }

    async fn write(&mut self, frame: OutputFrame) {
        let (slot, bytes, stream) = match frame {
            OutputFrame::Stdout(bytes) => (&mut self.stdout, bytes, "stdout"),
            OutputFrame::Stderr(bytes) => (&mut self.stderr, bytes, "stderr"),
        };
        if let Some(capture) = &self.capture {
            let _ = capture.send(bytes.clone());
        }
        let failed = match slot.as_mut() {
            Some(sink) => sink.write_all(&bytes).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            // Keep draining so the container never blocks on a full pipe.
            debug!(stream, error = %e, "sandbox:sink write failed, discarding further output");
            *slot = None;
        }
    }

    async fn finish(mut self) {
        for sink in [self.stdout.as_mut(), self.stderr.as_mut()].into_iter().flatten() {
            let _ = sink.flush().await;
        }
        self.capture.take();
    }
}

async fn pump(output: &mut OutputStream, sinks: &mut OutputSinks) {
    while let Some(frame) = output.next().await {
        match frame {
            Ok(frame) => sinks.write(frame).await,
            Err(e) => {
                debug!(error = %e, "sandbox:attach stream error");
                break;
            }
        }
    }
}

/// The drain task plus the exactly-once guards around closing the attach
/// stream and observing drain completion.
struct DrainLatch {
    close: CancellationToken,
    closed: bool,
    /// Cancelled by the drain task once the stream has ended.
    eof: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DrainLatch {
    fn spawn(mut output: OutputStream, mut sinks: OutputSinks) -> Self {
        let close = CancellationToken::new();
        let token = close.clone();
        let eof = CancellationToken::new();
        let ended = eof.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("sandbox:attach stream force-closed"),
                _ = pump(&mut output, &mut sinks) => {}
            }
            drop(output);
            sinks.finish().await;
            ended.cancel();
        });
        Self {
            close,
            closed: false,
            eof,
            task: Some(task),
        }
    }

    fn eof(&self) -> CancellationToken {
        self.eof.clone()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close.cancel();
        }
    }

    /// Wait for the drain task to finish. Only the first completed call
    /// records `stream-eof`; cancelling a pending call is safe.
    async fn wait(&mut self, session: &mut Session) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if let Err(e) = task.await {
            warn!(error = %e, "sandbox:drain task failed");
        }
        self.task = None;
        session.record(LifecycleEvent::StreamEof, None);
    }

    async fn force_close_and_wait(&mut self, session: &mut Session) {
        if self.task.is_none() {
            return;
        }
        self.close();
        self.wait(session).await;
    }
}

impl Drop for DrainLatch {
    fn drop(&mut self) {
        self.close.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// A helper task that is aborted if its owner goes away.
struct ScopedTask(Option<JoinHandle<()>>);

impl ScopedTask {
    async fn shutdown(mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        if let Some(task) = &self.0 {
            task.abort();
        }
    }
}

/// Copy stdin into the container until exhausted, then half-close.
fn forward_stdin(mut source: InputSource, mut input: InputSink) -> ScopedTask {
    ScopedTask(Some(tokio::spawn(async move {
        match tokio::io::copy(&mut source, &mut input).await {
            Ok(bytes) => debug!(bytes, "sandbox:stdin exhausted"),
            Err(e) => debug!(error = %e, "sandbox:stdin forwarding failed"),
        }
        if let Err(e) = input.shutdown().await {
            debug!(error = %e, "sandbox:stdin close failed");
        }
    })))
}

/// Writes the combined stream to a capture file off the drain path.
struct CaptureWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    task: ScopedTask,
}

impl CaptureWriter {
    fn spawn(mut file: tokio::fs::File, path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let task = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = file.write_all(&chunk).await {
                    warn!(path = %path.display(), error = %e, "sandbox:capture write failed");
                    return;
                }
            }
            let _ = file.flush().await;
        });
        Self {
            tx,
            task: ScopedTask(Some(task)),
        }
    }

    fn sender(&self) -> mpsc::UnboundedSender<Bytes> {
        self.tx.clone()
    }

    /// Wait until everything sent so far is on disk.
    async fn finish(self) {
        let CaptureWriter { tx, mut task } = self;
        drop(tx);
        if let Some(handle) = task.0.take() {
            let _ = handle.await;
        }
    }
}

/// `tuprwre-1a2b3c4d` style name for a new container.
pub fn container_name(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// `uid:gid` of the invoking user, so files written to binds stay owned by
/// them.
pub fn host_user() -> String {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    format!("{}:{}", uid, gid)
}

/// Split `repo[:tag]`, defaulting the tag to `latest`. A colon that belongs
/// to a registry port is not a tag separator.
pub fn split_image_name(name: &str) -> (&str, &str) {
    match name.rfind(':') {
        Some(idx) if idx > 0 && idx < name.len() - 1 && !name[idx + 1..].contains('/') => {
            (&name[..idx], &name[idx + 1..])
        }
        _ => (name, COMMIT_TAG),
    }
}

pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
