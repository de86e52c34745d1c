//! Scripted in-memory engine for orchestrator tests.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

use super::engine::{
    Attachment, ContainerRecord, ContainerSpec, Engine, ImageRecord, InputSink, OutputFrame,
    OutputStream, WaitRegistration,
};
use super::error::EngineError;
use super::resources::HostResources;

const GIB: i64 = 1024 * 1024 * 1024;

/// In-memory byte sink usable as container stdout/stderr.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone)]
enum Exit {
    Code(i64),
    /// Exits with the code but the wait never hears about it.
    Unnoticed(i64),
    WaitError(String),
    WaitClosed,
    StartError(String),
    Never,
}

/// How an engine call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never returns.
    Stall,
    Unreachable,
    Fail,
}

/// What a container does once started.
#[derive(Debug, Clone)]
pub struct Script {
    frames: Vec<(Option<Duration>, OutputFrame)>,
    exit: Exit,
    hold_open: bool,
    echo_stdin: bool,
}

impl Script {
    fn with_exit(exit: Exit) -> Self {
        Self {
            frames: Vec::new(),
            exit,
            hold_open: false,
            echo_stdin: false,
        }
    }

    pub fn exit(code: i64) -> Self {
        Self::with_exit(Exit::Code(code))
    }

    /// Exits with `code` without resolving the registered wait.
    pub fn unnoticed_exit(code: i64) -> Self {
        Self::with_exit(Exit::Unnoticed(code))
    }

    pub fn wait_error(message: &str) -> Self {
        Self::with_exit(Exit::WaitError(message.to_string()))
    }

    pub fn wait_closed() -> Self {
        Self::with_exit(Exit::WaitClosed)
    }

    pub fn start_error(message: &str) -> Self {
        Self::with_exit(Exit::StartError(message.to_string()))
    }

    /// Never exits and never closes its output.
    pub fn hold_open() -> Self {
        Self {
            hold_open: true,
            ..Self::with_exit(Exit::Never)
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.frames
            .push((None, OutputFrame::Stdout(Bytes::from(text.to_string()))));
        self
    }

    pub fn delayed_stdout(mut self, delay: Duration, text: &str) -> Self {
        self.frames
            .push((Some(delay), OutputFrame::Stdout(Bytes::from(text.to_string()))));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.frames
            .push((None, OutputFrame::Stderr(Bytes::from(text.to_string()))));
        self
    }

    /// Behave like `cat`: write stdin back out and exit once it is closed.
    pub fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    pub fn stderr_text(&self) -> String {
        self.frames
            .iter()
            .filter_map(|(_, frame)| match frame {
                OutputFrame::Stderr(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                OutputFrame::Stdout(_) => None,
            })
            .collect()
    }
}

struct Inner {
    script: Script,
    images_present: bool,
    pull_fails: bool,
    host: HostResources,
    faults: HashMap<&'static str, Fault>,
    calls: Vec<String>,
    specs: Vec<ContainerSpec>,
    containers: HashSet<String>,
    removed: Vec<String>,
    commits: Vec<(String, String, String)>,
    stdin: Vec<u8>,
    stdin_closed: bool,
    status_tx: Option<oneshot::Sender<i64>>,
    error_tx: Option<oneshot::Sender<EngineError>>,
    next_id: usize,
    env: Vec<String>,
    exec_output: Vec<(String, Vec<u8>)>,
    execs: Vec<Vec<String>>,
    listed_containers: Vec<ContainerRecord>,
    listed_images: Vec<ImageRecord>,
    removed_images: Vec<String>,
}

/// An [`Engine`] that replays a [`Script`] for every container and records
/// what it was asked to do.
#[derive(Clone)]
pub struct FakeEngine(Arc<Mutex<Inner>>);

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            script,
            images_present: true,
            pull_fails: false,
            host: HostResources {
                memory_total: 16 * GIB,
                cpu_count: 8,
            },
            faults: HashMap::new(),
            calls: Vec::new(),
            specs: Vec::new(),
            containers: HashSet::new(),
            removed: Vec::new(),
            commits: Vec::new(),
            stdin: Vec::new(),
            stdin_closed: false,
            status_tx: None,
            error_tx: None,
            next_id: 0,
            env: Vec::new(),
            exec_output: Vec::new(),
            execs: Vec::new(),
            listed_containers: Vec::new(),
            listed_images: Vec::new(),
            removed_images: Vec::new(),
        })))
    }

    pub fn without_images(self) -> Self {
        self.0.lock().unwrap().images_present = false;
        self
    }

    pub fn failing_pull(self) -> Self {
        self.0.lock().unwrap().pull_fails = true;
        self
    }

    /// Make every call named `call` (as listed by [`FakeEngine::calls`])
    /// misbehave.
    pub fn with_fault(self, call: &'static str, fault: Fault) -> Self {
        self.0.lock().unwrap().faults.insert(call, fault);
        self
    }

    pub fn with_env(self, env: &[&str]) -> Self {
        self.0.lock().unwrap().env = env.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Exec output for inspection containers created from `image`.
    pub fn with_exec_output(self, image: &str, output: &str) -> Self {
        self.0
            .lock()
            .unwrap()
            .exec_output
            .push((image.to_string(), output.as_bytes().to_vec()));
        self
    }

    pub fn with_containers(self, containers: Vec<ContainerRecord>) -> Self {
        self.0.lock().unwrap().listed_containers = containers;
        self
    }

    pub fn with_images(self, images: Vec<ImageRecord>) -> Self {
        self.0.lock().unwrap().listed_images = images;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.0.lock().unwrap().specs.last().cloned()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.0.lock().unwrap().specs.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.0.lock().unwrap().removed.clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.0.lock().unwrap().removed_images.clone()
    }

    pub fn commits(&self) -> Vec<(String, String, String)> {
        self.0.lock().unwrap().commits.clone()
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap().execs.clone()
    }

    pub fn stdin_received(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().stdin.clone()).unwrap()
    }

    pub fn stdin_closed(&self) -> bool {
        self.0.lock().unwrap().stdin_closed
    }

    /// Record the call and apply its fault, if any.
    async fn record(&self, call: &'static str) -> Result<(), EngineError> {
        let fault = {
            let mut inner = self.0.lock().unwrap();
            inner.calls.push(call.to_string());
            inner.faults.get(call).copied()
        };
        match fault {
            None => Ok(()),
            Some(Fault::Stall) => std::future::pending().await,
            Some(Fault::Unreachable) => Err(EngineError::Unreachable("daemon socket gone".into())),
            Some(Fault::Fail) => Err(EngineError::Api(format!("{} failed", call))),
        }
    }
}

/// Container stdin that records what it is sent.
struct RecordingInput {
    engine: FakeEngine,
    echo: Option<oneshot::Sender<Vec<u8>>>,
}

impl AsyncWrite for RecordingInput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.engine.0.lock().unwrap().stdin.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut inner = self.engine.0.lock().unwrap();
        inner.stdin_closed = true;
        let received = inner.stdin.clone();
        let status = match (&inner.script.exit, inner.script.echo_stdin) {
            (Exit::Code(code), true) => Some(*code),
            _ => None,
        };
        let status_tx = status.and_then(|_| inner.status_tx.take());
        drop(inner);

        if let Some(echo) = self.echo.take() {
            let _ = echo.send(received);
        }
        if let (Some(tx), Some(code)) = (status_tx, status) {
            let _ = tx.send(code);
        }
        Poll::Ready(Ok(()))
    }
}

impl Engine for FakeEngine {
    async fn image_exists(&self, _image: &str) -> Result<bool, EngineError> {
        self.record("image_exists").await?;
        Ok(self.0.lock().unwrap().images_present)
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.record("pull").await?;
        if self.0.lock().unwrap().pull_fails {
            return Err(EngineError::Api(format!("manifest for {} not found", image)));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record("create").await?;
        let mut inner = self.0.lock().unwrap();
        inner.next_id += 1;
        let id = format!("{:012x}", 0xc0ffee000 + inner.next_id);
        inner.specs.push(spec.clone());
        inner.containers.insert(id.clone());
        Ok(id)
    }

    async fn attach(&self, _id: &str, stdin: bool) -> Result<Attachment, EngineError> {
        self.record("attach").await?;
        let script = self.0.lock().unwrap().script.clone();

        let mut output: OutputStream = Box::pin(stream::iter(script.frames).then(
            |(delay, frame)| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, EngineError>(frame)
            },
        ));

        let mut echo = None;
        if script.echo_stdin {
            let (tx, rx) = oneshot::channel::<Vec<u8>>();
            echo = Some(tx);
            let echoed = stream::once(rx).filter_map(|received| async move {
                received
                    .ok()
                    .map(|bytes| Ok::<_, EngineError>(OutputFrame::Stdout(Bytes::from(bytes))))
            });
            output = Box::pin(output.chain(echoed));
        }
        if script.hold_open {
            output = Box::pin(output.chain(stream::pending()));
        }

        let input: InputSink = if stdin {
            Box::pin(RecordingInput {
                engine: self.clone(),
                echo,
            })
        } else {
            Box::pin(tokio::io::sink())
        };
        Ok(Attachment { output, input })
    }

    async fn register_wait(&self, _id: &str) -> Result<WaitRegistration, EngineError> {
        self.record("register_wait").await?;
        let (status_tx, status) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        let mut inner = self.0.lock().unwrap();
        inner.status_tx = Some(status_tx);
        inner.error_tx = Some(error_tx);
        Ok(WaitRegistration {
            status,
            error,
            guard: None,
        })
    }

    async fn start(&self, _id: &str) -> Result<(), EngineError> {
        self.record("start").await?;
        let mut inner = self.0.lock().unwrap();
        match inner.script.exit.clone() {
            Exit::Code(code) if !inner.script.echo_stdin => {
                if let Some(tx) = inner.status_tx.take() {
                    let _ = tx.send(code);
                }
            }
            Exit::Code(_) | Exit::Unnoticed(_) | Exit::Never => {}
            Exit::WaitError(message) => {
                if let Some(tx) = inner.error_tx.take() {
                    let _ = tx.send(EngineError::Api(message));
                }
            }
            Exit::WaitClosed => {
                inner.status_tx.take();
                inner.error_tx.take();
            }
            Exit::StartError(message) => return Err(EngineError::Api(message)),
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.record("remove").await?;
        let mut inner = self.0.lock().unwrap();
        if !inner.containers.remove(id) {
            return Err(EngineError::NotFound(format!("container {}", id)));
        }
        inner.removed.push(id.to_string());
        Ok(())
    }

    async fn commit(&self, id: &str, repo: &str, tag: &str) -> Result<(), EngineError> {
        self.record("commit").await?;
        self.0
            .lock()
            .unwrap()
            .commits
            .push((id.to_string(), repo.to_string(), tag.to_string()));
        Ok(())
    }

    async fn host_resources(&self) -> Result<HostResources, EngineError> {
        self.record("info").await?;
        Ok(self.0.lock().unwrap().host)
    }

    async fn exit_status(&self, _id: &str) -> Result<Option<i64>, EngineError> {
        self.record("exit_status").await?;
        match self.0.lock().unwrap().script.exit {
            Exit::Code(code) | Exit::Unnoticed(code) => Ok(Some(code)),
            _ => Ok(None),
        }
    }

    async fn container_env(&self, _id: &str) -> Result<Vec<String>, EngineError> {
        self.record("inspect").await?;
        Ok(self.0.lock().unwrap().env.clone())
    }

    async fn exec_stdout(&self, id: &str, cmd: Vec<String>) -> Result<Vec<u8>, EngineError> {
        self.record("exec").await?;
        let mut inner = self.0.lock().unwrap();
        inner.execs.push(cmd);
        // Containers are numbered in creation order; map back to their image.
        let image = inner
            .specs
            .iter()
            .enumerate()
            .find(|(i, _)| format!("{:012x}", 0xc0ffee000 + i + 1) == id)
            .map(|(_, spec)| spec.image.clone())
            .unwrap_or_default();
        Ok(inner
            .exec_output
            .iter()
            .find(|(img, _)| *img == image)
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        self.record("list_containers").await?;
        Ok(self.0.lock().unwrap().listed_containers.clone())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        self.record("list_images").await?;
        Ok(self.0.lock().unwrap().listed_images.clone())
    }

    async fn remove_image(&self, id: &str) -> Result<(), EngineError> {
        self.record("remove_image").await?;
        self.0.lock().unwrap().removed_images.push(id.to_string());
        Ok(())
    }
}
