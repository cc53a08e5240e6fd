//! Agent messages from a JSONL session log, used to replace screen-scraped
//! turn text with the exact message the agent produced.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    msg: Message,
}

#[derive(Debug, Default, Deserialize)]
struct Message {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Reads every non-blank `agent_message` from a session log.
///
/// Lines that are not JSON objects, do not parse, or carry other event kinds
/// are skipped. A missing file is an error.
pub fn read_agent_messages(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&contents);
    let messages = text
        .lines()
        .filter_map(|raw| {
            let line = raw.replace('\0', "");
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            let entry: Entry = serde_json::from_str(line).ok()?;
            (entry.kind == "codex_event"
                && entry.payload.msg.kind == "agent_message"
                && !entry.payload.msg.message.trim().is_empty())
            .then_some(entry.payload.msg.message)
        })
        .collect();
    Ok(messages)
}

/// Cursor over a growing session log. Each emitted turn consumes the next
/// agent message, so turn N pairs with the N-th message.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
    wait: Duration,
    index: usize,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            path: path.into(),
            wait,
            index: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the next unconsumed message, polling the file until `wait`
    /// elapses. `None` means nothing arrived in time.
    ///
    /// Blocks the calling thread while polling.
    pub fn next_message(&mut self) -> Option<String> {
        let deadline = Instant::now() + self.wait;
        loop {
            let messages = match read_agent_messages(&self.path) {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::trace!(path = %self.path.display(), error = %err, "session log not readable yet");
                    Vec::new()
                }
            };
            while let Some(message) = messages.get(self.index) {
                self.index += 1;
                let message = message.trim();
                if !message.is_empty() {
                    return Some(message.to_string());
                }
            }
            if self.wait.is_zero() || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
