//! Opt-in lifecycle diagnostics for a single run.
//!
//! Two output modes may be active at once, both written to the same sink:
//!
//! ```text
//! [tuprwre][debug-io] +3ms create
//! {"timestamp":"...","run_id":"...","event":"create","elapsed_ms":3,"container_id":"..."}
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle transitions of a run, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEvent {
    Create,
    Attach,
    WaitRegistered,
    Start,
    WaitExit,
    StreamEof,
    Cleanup,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Create => "create",
            LifecycleEvent::Attach => "attach",
            LifecycleEvent::WaitRegistered => "wait-registered",
            LifecycleEvent::Start => "start",
            LifecycleEvent::WaitExit => "wait-exit",
            LifecycleEvent::StreamEof => "stream-eof",
            LifecycleEvent::Cleanup => "cleanup",
        }
    }
}

/// One structured diagnostic line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub timestamp: String,
    pub run_id: String,
    pub event: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

pub type DiagnosticSink = Arc<Mutex<dyn Write + Send>>;

/// Which diagnostic modes are on. Both off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsMode {
    pub text: bool,
    pub json: bool,
}

impl DiagnosticsMode {
    pub fn is_enabled(&self) -> bool {
        self.text || self.json
    }
}

pub struct Diagnostics {
    mode: DiagnosticsMode,
    sink: Option<DiagnosticSink>,
    start: Instant,
    run_id: String,
    container_id: Option<String>,
}

impl Diagnostics {
    pub fn new(mode: DiagnosticsMode, sink: Option<DiagnosticSink>, run_id: String) -> Self {
        Self {
            mode,
            sink,
            start: Instant::now(),
            run_id,
            container_id: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(DiagnosticsMode::default(), None, String::new())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn set_container(&mut self, id: &str) {
        self.container_id = Some(id.to_string());
    }

    pub fn emit(&self, event: LifecycleEvent, details: Option<Map<String, Value>>) {
        if !self.mode.is_enabled() {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };

        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        let mut lines = String::new();

        if self.mode.text {
            lines.push_str(&format!(
                "[tuprwre][debug-io] +{}ms {}\n",
                elapsed_ms,
                event.as_str()
            ));
        }

        if self.mode.json {
            let record = DiagnosticEvent {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                run_id: self.run_id.clone(),
                event: event.as_str().to_string(),
                elapsed_ms,
                container_id: self.container_id.clone(),
                details,
            };
            if let Ok(payload) = serde_json::to_string(&record) {
                lines.push_str(&payload);
                lines.push('\n');
            }
        }

        if let Ok(mut writer) = sink.lock() {
            let _ = writer.write_all(lines.as_bytes());
            let _ = writer.flush();
        }
    }
}
