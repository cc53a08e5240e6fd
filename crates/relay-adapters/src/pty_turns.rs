//! Drives an interactive CLI under a pseudo-terminal and reports its turns.
//!
//! Architecture:
//! - A blocking reader thread splits PTY output into lines and feeds them to
//!   the [`TurnParser`]. It also answers cursor-position queries.
//! - A tokio task closes turns that go quiet for `idle_timeout`.
//! - The caller's task sends prompts, gated on readiness and turn completion.
//!
//! The three coordinate through capacity-1 channels written only with
//! `try_send`, so a producer never blocks on a slow consumer.

// PIDs are always within i32 range in practice
#![allow(clippy::cast_possible_wrap)]

use crate::error::{PtyError, Result};
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use relay_core::turns::{LineEvent, TurnParser, write_report};
use relay_proto::{TurnReport, TurnStatus};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PTY_COLS: u16 = 120;
pub const PTY_ROWS: u16 = 40;
/// Longest line kept; the rest of a longer line is dropped.
pub const DEFAULT_BUFFER_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;
const DSR_QUERY: &[u8] = b"\x1b[6n";
const DSR_REPLY: &[u8] = b"\x1b[24;80R";
const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SLACK: Duration = Duration::from_secs(2);
const KILL_WAIT: Duration = Duration::from_millis(500);

/// Settings for one PTY session.
#[derive(Debug, Clone)]
pub struct PtyTurnConfig {
    /// Run as `bash -lc <command>`.
    pub command: String,
    pub prompts: Vec<String>,
    /// Working directory; the current directory when unset.
    pub cwd: Option<PathBuf>,
    pub term: String,
    /// Exported as `LANG` and `LC_ALL`.
    pub lang: String,
    pub start_delay: Duration,
    /// Pause before each prompt is written.
    pub prompt_delay: Duration,
    /// Pause after each character; zero writes the prompt at once.
    pub type_delay: Duration,
    pub bracketed_paste: bool,
    /// Written after every prompt.
    pub submit_seq: Vec<u8>,
    /// Hold the first prompt until the ready pattern is seen.
    pub wait_ready: bool,
    /// Send `exit` once the last turn completes.
    pub send_exit: bool,
    /// Zero disables idle detection.
    pub idle_timeout: Duration,
    pub turn_timeout: Duration,
    /// Stop the child after this many reports. Zero means no limit.
    pub max_turns: usize,
    pub exit_grace: Duration,
    pub buffer_bytes: usize,
    /// Appends every raw PTY byte to this file (mode 0600).
    pub raw_log: Option<PathBuf>,
}

impl Default for PtyTurnConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            prompts: Vec::new(),
            cwd: None,
            term: "xterm-256color".to_string(),
            lang: "en_US.UTF-8".to_string(),
            start_delay: Duration::from_millis(800),
            prompt_delay: Duration::from_millis(200),
            type_delay: Duration::ZERO,
            bracketed_paste: false,
            submit_seq: b"\r".to_vec(),
            wait_ready: true,
            send_exit: true,
            idle_timeout: Duration::from_secs(2),
            turn_timeout: Duration::from_secs(120),
            max_turns: 0,
            exit_grace: Duration::from_secs(2),
            buffer_bytes: DEFAULT_BUFFER_BYTES,
            raw_log: None,
        }
    }
}

/// What happened during a session.
#[derive(Debug, Clone, Default)]
pub struct PtyTurnOutcome {
    /// Every report, in emission order.
    pub reports: Vec<TurnReport>,
    /// `None` when the child had to be abandoned.
    pub exit_code: Option<u32>,
    /// The prompt loop gave up waiting for readiness or a turn.
    pub timed_out: bool,
    /// The child was stopped after `max_turns` reports.
    pub max_turns_reached: bool,
}

#[derive(Debug, Default)]
struct TurnState {
    active: bool,
    output_seen: bool,
    emitted: usize,
}

struct Signals {
    turn_done: mpsc::Sender<()>,
    ready: mpsc::Sender<()>,
    activity: mpsc::Sender<()>,
}

fn notify(tx: &mpsc::Sender<()>) {
    let _ = tx.try_send(());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// State shared by the reader thread, the idle timer and the prompt loop.
struct Session {
    parser: Mutex<TurnParser>,
    state: Mutex<TurnState>,
    out: Mutex<Box<dyn Write + Send>>,
    reports: Mutex<Vec<TurnReport>>,
    signals: Signals,
    done: CancellationToken,
    terminated: AtomicBool,
    exited: Arc<AtomicBool>,
    max_turns: usize,
    exit_grace: Duration,
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
}

impl Session {
    fn handle_line(&self, line: &str) {
        let events = lock(&self.parser).handle_line(line);
        for event in events {
            match event {
                LineEvent::Turn(report) => self.on_emit(report),
                LineEvent::Prompt => self.set_turn_done(),
                LineEvent::Output => self.on_output(),
                LineEvent::Ready => self.on_ready(),
            }
        }
    }

    fn on_output(&self) {
        {
            let mut state = lock(&self.state);
            if state.active {
                state.output_seen = true;
            }
        }
        notify(&self.signals.activity);
    }

    fn on_ready(&self) {
        if self.turn_has_content() {
            self.close_turn(TurnStatus::TurnCompleteReady);
            return;
        }
        notify(&self.signals.ready);
    }

    fn turn_has_content(&self) -> bool {
        let (active, seen) = {
            let state = lock(&self.state);
            (state.active, state.output_seen)
        };
        active && seen && lock(&self.parser).has_content()
    }

    /// Emits the current turn with `status` and marks it done.
    fn close_turn(&self, status: TurnStatus) {
        let report = lock(&self.parser).emit(status, true);
        if let Some(report) = report {
            self.on_emit(report);
        }
        self.set_turn_done();
    }

    fn on_emit(&self, report: TurnReport) {
        debug!(turn = report.turn, status = %report.status.as_str(), "turn reported");
        {
            let mut out = lock(&self.out);
            if let Err(err) = write_report(&mut *out, &report) {
                warn!(error = %err, "failed to write turn report");
            }
        }
        lock(&self.reports).push(report);
        let emitted = {
            let mut state = lock(&self.state);
            state.emitted += 1;
            state.emitted
        };
        if self.max_turns > 0 && emitted >= self.max_turns {
            info!(max_turns = self.max_turns, "turn limit reached");
            lock(&self.parser).disable_flush();
            self.terminate();
        }
    }

    fn set_turn_active(&self) {
        let mut state = lock(&self.state);
        state.active = true;
        state.output_seen = false;
    }

    fn set_turn_done(&self) {
        {
            let mut state = lock(&self.state);
            state.active = false;
            state.output_seen = false;
        }
        notify(&self.signals.turn_done);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Closes the PTY and stops the child: SIGTERM now, SIGKILL after
    /// `exit_grace`. Runs once.
    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(lock(&self.master).take());
        #[cfg(unix)]
        if let Some(raw) = self.pid {
            let pid = Pid::from_raw(raw as i32);
            debug!(pid = %pid, "Sending SIGTERM");
            let _ = kill(pid, Signal::SIGTERM);
            if !self.exit_grace.is_zero() {
                let grace = self.exit_grace;
                let exited = Arc::clone(&self.exited);
                std::thread::spawn(move || {
                    std::thread::sleep(grace);
                    if !exited.load(Ordering::SeqCst) {
                        debug!(pid = %pid, "Grace period expired, sending SIGKILL");
                        let _ = kill(pid, Signal::SIGKILL);
                    }
                });
            }
        }
        self.done.cancel();
    }
}

/// Matches `ESC [ 6 n` across read boundaries.
#[derive(Debug, Default)]
struct DsrMatcher {
    matched: usize,
}

impl DsrMatcher {
    fn feed(&mut self, byte: u8) -> bool {
        if byte == DSR_QUERY[self.matched] {
            self.matched += 1;
            if self.matched == DSR_QUERY.len() {
                self.matched = 0;
                return true;
            }
        } else {
            // A fresh ESC may start the next query.
            self.matched = usize::from(byte == DSR_QUERY[0]);
        }
        false
    }
}

fn open_raw_log(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn write_pty(writer: &SharedWriter, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let mut writer = lock(writer);
    if let Err(err) = writer.write_all(data).and_then(|()| writer.flush()) {
        debug!(error = %err, "PTY write failed");
    }
}

/// Reader thread body: lines to the parser until EOF, then the EOF flush.
fn read_pty(
    mut reader: Box<dyn Read + Send>,
    writer: &SharedWriter,
    session: &Session,
    buffer_bytes: usize,
    raw_log: Option<&Path>,
) {
    let mut raw = raw_log.and_then(|path| match open_raw_log(path) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "raw log open error");
            None
        }
    });
    let mut buf = [0u8; READ_CHUNK];
    let mut line: Vec<u8> = Vec::new();
    let mut dsr = DsrMatcher::default();

    'read: loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                break;
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // EIO once the child side closes.
                debug!(error = %err, "PTY reader error");
                break;
            }
        };
        let chunk = &buf[..n];
        if let Some(file) = raw.as_mut() {
            let _ = file.write_all(chunk);
        }
        for &byte in chunk {
            if dsr.feed(byte) {
                write_pty(writer, DSR_REPLY);
            }
            match byte {
                b'\n' => {
                    session.handle_line(&String::from_utf8_lossy(&line));
                    line.clear();
                }
                b'\r' => {
                    if !line.is_empty() {
                        session.handle_line(&String::from_utf8_lossy(&line));
                        line.clear();
                    }
                }
                _ => {
                    if line.len() < buffer_bytes {
                        line.push(byte);
                    }
                }
            }
            if session.is_terminated() {
                line.clear();
                break 'read;
            }
        }
    }

    if !line.is_empty() {
        session.handle_line(&String::from_utf8_lossy(&line));
    }
    let report = lock(&session.parser).flush_eof();
    if let Some(report) = report {
        session.on_emit(report);
    }
    session.done.cancel();
}

/// Emits `turn_complete_idle` when an active turn with content goes quiet.
async fn idle_timer(session: Arc<Session>, mut activity: mpsc::Receiver<()>, idle: Duration) {
    if idle.is_zero() {
        return;
    }
    let timer = sleep(idle);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            () = session.done.cancelled() => return,
            Some(()) = activity.recv() => timer.as_mut().reset(Instant::now() + idle),
            () = &mut timer => {
                if session.turn_has_content() {
                    // The session-log overlay may block while it polls.
                    let closing = Arc::clone(&session);
                    let _ = tokio::task::spawn_blocking(move || {
                        closing.close_turn(TurnStatus::TurnCompleteIdle);
                    })
                    .await;
                }
                timer.as_mut().reset(Instant::now() + idle);
            }
        }
    }
}

enum Wait {
    Signalled,
    TimedOut,
    /// The session ended first.
    Finished,
}

async fn wait_signal(rx: &mut mpsc::Receiver<()>, timeout: Duration, done: &CancellationToken) -> Wait {
    tokio::select! {
        biased;
        Some(()) = rx.recv() => Wait::Signalled,
        () = done.cancelled() => Wait::Finished,
        () = sleep(timeout) => Wait::TimedOut,
    }
}

/// Polls for exit until `timeout`, then kills the child and waits briefly.
async fn wait_process(child: &mut Box<dyn Child + Send + Sync>, timeout: Duration) -> Result<Option<u32>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.exit_code()));
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }
    warn!(timeout = ?timeout, "child still running, killing");
    let _ = child.kill();
    let deadline = Instant::now() + KILL_WAIT;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.exit_code()));
        }
        sleep(POLL_INTERVAL).await;
    }
    Ok(None)
}

/// Runs one command under a PTY, sends its prompts and collects turn reports.
pub struct PtyTurnRunner {
    config: PtyTurnConfig,
    parser: TurnParser,
}

impl std::fmt::Debug for PtyTurnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyTurnRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PtyTurnRunner {
    pub fn new(config: PtyTurnConfig, parser: TurnParser) -> Self {
        Self { config, parser }
    }

    fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new("bash");
        cmd.args(["-lc", self.config.command.as_str()]);
        if let Some(cwd) = &self.config.cwd {
            cmd.cwd(cwd);
        } else if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        let term = self.config.term.trim();
        if !term.is_empty() {
            cmd.env("TERM", term);
        }
        let lang = self.config.lang.trim();
        if !lang.is_empty() {
            cmd.env("LANG", lang);
            cmd.env("LC_ALL", lang);
        }
        if let Some(log) = &self.parser.config().session_log {
            cmd.env("CODEX_TUI_RECORD_SESSION", "true");
            cmd.env("CODEX_TUI_SESSION_LOG_PATH", log);
        }
        cmd
    }

    /// Runs the session to completion, writing each report to `out` as a
    /// JSON line as soon as it is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Spawn`] when the PTY cannot be opened or the
    /// command cannot be started.
    pub async fn run(self, out: impl Write + Send + 'static) -> Result<PtyTurnOutcome> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let writer: SharedWriter = Arc::new(Mutex::new(
            pair.master
                .take_writer()
                .map_err(|e| PtyError::Spawn(e.to_string()))?,
        ));
        let mut child = pair
            .slave
            .spawn_command(self.command())
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // Drop the slave so EOF arrives when the child exits.
        drop(pair.slave);
        info!(pid = ?child.process_id(), command = %self.config.command, "started PTY child");

        let (turn_done_tx, mut turn_done_rx) = mpsc::channel(1);
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let (activity_tx, activity_rx) = mpsc::channel(1);
        let exited = Arc::new(AtomicBool::new(false));
        let config = self.config;
        let session = Arc::new(Session {
            parser: Mutex::new(self.parser),
            state: Mutex::new(TurnState::default()),
            out: Mutex::new(Box::new(out)),
            reports: Mutex::new(Vec::new()),
            signals: Signals {
                turn_done: turn_done_tx,
                ready: ready_tx,
                activity: activity_tx,
            },
            done: CancellationToken::new(),
            terminated: AtomicBool::new(false),
            exited: Arc::clone(&exited),
            max_turns: config.max_turns,
            exit_grace: config.exit_grace,
            pid: child.process_id(),
            master: Mutex::new(Some(pair.master)),
        });
        let _stop_timer = scopeguard::guard(session.done.clone(), |done| done.cancel());

        {
            let session = Arc::clone(&session);
            let writer = Arc::clone(&writer);
            let buffer_bytes = config.buffer_bytes.max(1);
            let raw_log = config.raw_log.clone();
            std::thread::Builder::new()
                .name("pty-reader".to_string())
                .spawn(move || {
                    read_pty(reader, &writer, &session, buffer_bytes, raw_log.as_deref());
                })?;
        }
        tokio::spawn(idle_timer(
            Arc::clone(&session),
            activity_rx,
            config.idle_timeout,
        ));

        let mut outcome = PtyTurnOutcome::default();
        let mut first = true;
        for prompt in &config.prompts {
            let wait = if first {
                first = false;
                if !config.start_delay.is_zero() {
                    sleep(config.start_delay).await;
                }
                if config.wait_ready {
                    wait_signal(&mut ready_rx, config.turn_timeout, &session.done).await
                } else {
                    Wait::Signalled
                }
            } else {
                wait_signal(&mut turn_done_rx, config.turn_timeout, &session.done).await
            };
            match wait {
                Wait::Signalled => {}
                Wait::TimedOut => {
                    warn!(timeout = ?config.turn_timeout, "timeout waiting for the child");
                    outcome.timed_out = true;
                    break;
                }
                Wait::Finished => break,
            }
            // Completions seen before this prompt belong to the previous turn.
            while turn_done_rx.try_recv().is_ok() {}
            send_prompt(&config, &writer, prompt).await;
            session.set_turn_active();
        }

        if config.send_exit && !session.done.is_cancelled() {
            match wait_signal(&mut turn_done_rx, config.turn_timeout, &session.done).await {
                Wait::Signalled => send_prompt(&config, &writer, "exit").await,
                Wait::TimedOut => {
                    warn!(timeout = ?config.turn_timeout, "timeout waiting for turn completion");
                    outcome.timed_out = true;
                }
                Wait::Finished => {}
            }
        }

        let bound = config.turn_timeout + config.idle_timeout + config.exit_grace + SLACK;
        tokio::select! {
            () = session.done.cancelled() => {}
            () = sleep(bound) => warn!(bound = ?bound, "reader still running, giving up"),
        }
        outcome.exit_code = wait_process(&mut child, config.exit_grace + SLACK).await?;
        exited.store(true, Ordering::SeqCst);
        info!(exit_code = ?outcome.exit_code, "PTY child finished");

        outcome.max_turns_reached = session.is_terminated();
        outcome.reports = lock(&session.reports).clone();
        Ok(outcome)
    }
}

async fn send_prompt(config: &PtyTurnConfig, writer: &SharedWriter, prompt: &str) {
    if prompt.trim().is_empty() {
        return;
    }
    sleep(config.prompt_delay).await;
    if config.bracketed_paste {
        write_pty(writer, PASTE_START);
        write_pty(writer, prompt.as_bytes());
        write_pty(writer, PASTE_END);
    } else if !config.type_delay.is_zero() {
        let mut utf8 = [0u8; 4];
        for ch in prompt.chars() {
            write_pty(writer, ch.encode_utf8(&mut utf8).as_bytes());
            sleep(config.type_delay).await;
        }
        sleep(config.type_delay).await;
    } else {
        write_pty(writer, prompt.as_bytes());
    }
    write_pty(writer, &config.submit_seq);
}
