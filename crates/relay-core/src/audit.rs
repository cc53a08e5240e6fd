//! JSONL audit trail for bridge calls.
//!
//! Every executor attempt produces a `request` event followed by either a
//! `response` or a `response_error` event; served-from-cache calls produce a
//! single `cache_hit`. Events are flat JSON objects, one per line:
//!
//! ```text
//! {"ts":"…","component":"cloudflarebridge","event":"request","method":"GET","path":"https://…","attempt":1,"ctx_account_alias":"main"}
//! ```
//!
//! Sinks are best-effort: a failing sink never fails the call being audited.
//! File appends run on an [`AuditWriter`] thread, never on the caller's task.

use crate::redact::Redactor;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc as std_mpsc};
use tokio::sync::mpsc;
use tracing::debug;

/// Kinds of audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Request,
    Response,
    CacheHit,
    ResponseError,
}

/// Top-level keys owned by [`AuditEvent`] itself.
const RESERVED_KEYS: [&str; 3] = ["ts", "component", "event"];

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: String,
    pub component: String,
    pub event: AuditKind,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl AuditEvent {
    pub fn new(component: impl Into<String>, event: AuditKind) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            component: component.into(),
            event,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds `ctx_<key>` entries for every non-blank key of `context`.
    pub fn context(mut self, context: &BTreeMap<String, String>) -> Self {
        for (key, value) in context {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            self.fields
                .insert(format!("ctx_{key}"), Value::String(value.trim().to_string()));
        }
        self
    }

    /// Merges caller-supplied fields without overwriting existing keys.
    /// `ts`, `component` and `event` are skipped.
    pub fn extend(mut self, extra: &BTreeMap<String, Value>) -> Self {
        for (key, value) in extra {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Redacts every string field in place.
    pub fn redact_with(mut self, redactor: &Redactor) -> Self {
        for value in self.fields.values_mut() {
            redactor.redact_json(value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Records one event. Must not block on slow consumers.
    fn record(&self, event: &AuditEvent);

    /// Flushes buffered events, if the sink buffers.
    fn flush(&self) {}
}

/// Appends events to a JSONL file.
///
/// The file is opened per append with create+append semantics, so several
/// processes can share one log on POSIX filesystems. Writes from this
/// process are serialized so lines never interleave.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event as a single line.
    pub fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| std::io::Error::other("audit log lock poisoned"))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = open_append(&self.path)?;
        // One write call per line keeps concurrent appenders line-atomic.
        file.write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_append(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            debug!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }
}

enum WriterMsg {
    Event(Box<AuditEvent>),
    Flush(std_mpsc::Sender<()>),
}

/// Hands events to a dedicated thread that appends them to a
/// [`JsonlAuditLog`].
///
/// `record` only enqueues, so the calling task never touches the disk.
/// Events are written in the order they were recorded; `flush` blocks until
/// everything recorded before it is on disk.
#[derive(Debug)]
pub struct AuditWriter {
    path: PathBuf,
    tx: std_mpsc::Sender<WriterMsg>,
}

impl AuditWriter {
    pub fn spawn(log: JsonlAuditLog) -> std::io::Result<Self> {
        let path = log.path().to_path_buf();
        let (tx, rx) = std_mpsc::channel::<WriterMsg>();
        std::thread::Builder::new()
            .name("relay-audit".to_string())
            .spawn(move || {
                for msg in rx {
                    match msg {
                        WriterMsg::Event(event) => log.record(&event),
                        WriterMsg::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;
        Ok(Self { path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for AuditWriter {
    fn record(&self, event: &AuditEvent) {
        if self.tx.send(WriterMsg::Event(Box::new(event.clone()))).is_err() {
            debug!(path = %self.path.display(), "audit writer gone; event dropped");
        }
    }

    fn flush(&self) {
        let (done_tx, done_rx) = std_mpsc::channel();
        if self.tx.send(WriterMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

/// Reads every event back from a JSONL audit file, skipping malformed lines.
pub fn read_events(path: impl AsRef<Path>) -> std::io::Result<Vec<AuditEvent>> {
    let file = File::open(path)?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str(&line) {
            events.push(event);
        }
    }
    Ok(events)
}

/// Forwards events to an async consumer without blocking.
///
/// Events are dropped when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelSink {
    fn record(&self, event: &AuditEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            debug!("audit channel full or closed; event dropped");
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.event == kind).count())
            .unwrap_or(0)
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
