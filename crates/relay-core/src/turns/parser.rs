//! Line classifier and turn accumulator.

use super::{Result, SessionLog, TurnError, strip_ansi};
use crate::text::{cap_line_bytes, trim_line_ending};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use relay_proto::{TurnReport, TurnStatus};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROMPT_REGEX: &str = r"^(>\s*|codex>\s*|you>\s*|user>\s*)$";
pub const DEFAULT_READY_REGEX: &str = r"(?i)(context left|openai codex|>_)";
pub const DEFAULT_IGNORE_REGEX: &str = r"^(\s*[│╭╰╮╯╞╡╤╧╪─]+.*|\s*>_.*|\s*OpenAI Codex.*|\s*model:.*|\s*directory:.*|\s*Tip:.*|\s*›.*|\s*↳.*|\s*•\s*(Working|Preparing).*|\s*\d+%\s+context\s+left.*)$";
pub const DEFAULT_END_REGEX: &str = r"^DONE$";

/// How `final_report` is built from a turn's content lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportMode {
    /// Lines of the last non-blank-separated block, joined with `\n`.
    #[default]
    Block,
    /// The most recent content line only.
    LastLine,
}

impl FromStr for ReportMode {
    type Err = TurnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "last-line" => Ok(Self::LastLine),
            other => Err(TurnError::InvalidMode(other.to_string())),
        }
    }
}

/// Raw pattern strings as given on the command line. Blank `ready`,
/// `ignore` and `end` patterns disable that classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSet {
    pub prompt: String,
    pub ready: String,
    pub ignore: String,
    pub end: String,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT_REGEX.to_string(),
            ready: DEFAULT_READY_REGEX.to_string(),
            ignore: DEFAULT_IGNORE_REGEX.to_string(),
            end: DEFAULT_END_REGEX.to_string(),
        }
    }
}

fn compile(flag: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| TurnError::InvalidRegex { flag, source })
}

fn compile_optional(flag: &'static str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.trim().is_empty() {
        return Ok(None);
    }
    compile(flag, pattern).map(Some)
}

/// Compiled parser settings.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub prompt: Regex,
    pub ready: Option<Regex>,
    pub ignore: Option<Regex>,
    pub end: Option<Regex>,
    pub mode: ReportMode,
    /// Copied into every report when non-empty.
    pub source: Option<String>,
    pub strip_ansi: bool,
    pub flush_on_eof: bool,
    /// End of stream reports `turn_complete_exit` instead of `eof`.
    pub eof_ready: bool,
    /// End-marker lines close the turn without becoming content.
    pub strip_end: bool,
    pub session_log: Option<PathBuf>,
    pub session_log_wait: Duration,
}

impl ParserConfig {
    /// Compiles `patterns` with default behavior flags.
    pub fn new(patterns: &PatternSet) -> Result<Self> {
        Ok(Self {
            prompt: compile("prompt-regex", &patterns.prompt)?,
            ready: compile_optional("ready-regex", &patterns.ready)?,
            ignore: compile_optional("ignore-regex", &patterns.ignore)?,
            end: compile_optional("end-regex", &patterns.end)?,
            mode: ReportMode::Block,
            source: None,
            strip_ansi: true,
            flush_on_eof: true,
            eof_ready: false,
            strip_end: true,
            session_log: None,
            session_log_wait: Duration::from_secs(2),
        })
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ReportMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.source = (!source.trim().is_empty()).then_some(source);
        self
    }

    #[must_use]
    pub fn with_session_log(mut self, path: impl Into<PathBuf>, wait: Duration) -> Self {
        self.session_log = Some(path.into());
        self.session_log_wait = wait;
        self
    }
}

/// What a single line caused. Callers react in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A turn was closed and reported.
    Turn(TurnReport),
    /// The child is waiting for input again.
    Prompt,
    /// The line became turn content.
    Output,
    /// The line matched the readiness pattern.
    Ready,
}

/// Stateful turn segmenter. Not synchronized: wrap in a mutex when lines and
/// idle-timeout emissions come from different threads.
#[derive(Debug)]
pub struct TurnParser {
    config: ParserConfig,
    session: Option<SessionLog>,
    turn: u64,
    block: Vec<String>,
    last_block: Vec<String>,
    last_line: String,
    flush_disabled: bool,
}

impl TurnParser {
    pub fn new(config: ParserConfig) -> Self {
        let session = config
            .session_log
            .as_ref()
            .map(|path| SessionLog::new(path.clone(), config.session_log_wait));
        Self {
            config,
            session,
            turn: 1,
            block: Vec::new(),
            last_block: Vec::new(),
            last_line: String::new(),
            flush_disabled: false,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Number of the next turn to be reported.
    pub fn next_turn(&self) -> u64 {
        self.turn
    }

    /// Classifies one logical line.
    pub fn handle_line(&mut self, raw: &str) -> Vec<LineEvent> {
        let stripped;
        let mut line = raw;
        if self.config.strip_ansi {
            stripped = strip_ansi(raw);
            line = &stripped;
        }
        let line = trim_line_ending(line);
        let trimmed = line.trim();
        let mut events = Vec::new();

        if self.config.prompt.is_match(trimmed) {
            self.close(TurnStatus::TurnComplete, &mut events);
            return events;
        }

        if trimmed.is_empty() {
            if !self.block.is_empty() {
                self.last_block = std::mem::take(&mut self.block);
            }
            return events;
        }

        if self.config.ignore.as_ref().is_some_and(|re| re.is_match(line)) {
            return events;
        }

        let is_end = self.config.end.as_ref().is_some_and(|re| re.is_match(trimmed));
        if is_end && self.config.strip_end {
            self.close(TurnStatus::TurnCompleteEnd, &mut events);
            return events;
        }

        self.block.push(line.to_string());
        self.last_line = line.to_string();
        events.push(LineEvent::Output);

        if self.config.ready.as_ref().is_some_and(|re| re.is_match(trimmed)) {
            events.push(LineEvent::Ready);
        }

        if is_end {
            self.close(TurnStatus::TurnCompleteEnd, &mut events);
        }
        events
    }

    fn close(&mut self, status: TurnStatus, events: &mut Vec<LineEvent>) {
        if let Some(report) = self.emit(status, true) {
            events.push(LineEvent::Turn(report));
        }
        events.push(LineEvent::Prompt);
    }

    /// Closes the current turn. Returns `None` and resets the accumulated
    /// state when there is nothing to report.
    pub fn emit(&mut self, status: TurnStatus, ready_for_prompt: bool) -> Option<TurnReport> {
        let mut final_report = match self.config.mode {
            ReportMode::LastLine => self.last_line.trim().to_string(),
            ReportMode::Block => {
                let lines = if self.block.is_empty() {
                    &self.last_block
                } else {
                    &self.block
                };
                lines.join("\n").trim().to_string()
            }
        };
        if let Some(message) = self.session.as_mut().and_then(SessionLog::next_message) {
            final_report = message;
        }
        if final_report.is_empty() {
            self.reset();
            return None;
        }

        let report = TurnReport {
            turn: self.turn,
            captured_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            status,
            ready_for_prompt,
            final_report,
            source: self.config.source.clone(),
        };
        self.turn += 1;
        self.reset();
        tracing::debug!(turn = report.turn, status = %report.status, "turn closed");
        Some(report)
    }

    fn reset(&mut self) {
        self.block.clear();
        self.last_block.clear();
        self.last_line.clear();
    }

    /// Reports whatever is pending at end of stream.
    pub fn flush_eof(&mut self) -> Option<TurnReport> {
        if !self.config.flush_on_eof || self.flush_disabled {
            return None;
        }
        if self.config.eof_ready {
            self.emit(TurnStatus::TurnCompleteExit, true)
        } else {
            self.emit(TurnStatus::Eof, false)
        }
    }

    /// Suppresses the end-of-stream report, used once a turn budget is spent.
    pub fn disable_flush(&mut self) {
        self.flush_disabled = true;
    }

    pub fn has_content(&self) -> bool {
        !self.last_line.is_empty() || !self.block.is_empty() || !self.last_block.is_empty()
    }
}

/// Writes one report as a single JSON line and flushes.
pub fn write_report(out: &mut impl Write, report: &TurnReport) -> Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Runs the parser over a line-oriented reader, writing each report to
/// `out`. Lines longer than `max_line_bytes` are truncated (0 disables the
/// cap). Returns the number of reports written.
///
/// A read error still flushes the pending turn before it is returned.
pub fn feed_lines(
    parser: &mut TurnParser,
    mut input: impl BufRead,
    out: &mut impl Write,
    max_line_bytes: usize,
) -> Result<u64> {
    let mut written = 0;
    let mut buf = Vec::new();
    let read_error = loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => break None,
            Ok(_) => {}
            Err(err) => break Some(err),
        }
        let text = String::from_utf8_lossy(&buf);
        let line = cap_line_bytes(trim_line_ending(&text), max_line_bytes);
        for event in parser.handle_line(line) {
            if let LineEvent::Turn(report) = event {
                write_report(out, &report)?;
                written += 1;
            }
        }
    };
    if let Some(report) = parser.flush_eof() {
        write_report(out, &report)?;
        written += 1;
    }
    match read_error {
        Some(err) => Err(err.into()),
        None => Ok(written),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(patterns: PatternSet) -> ParserConfig {
        let mut config = ParserConfig::new(&patterns).unwrap();
        config.session_log_wait = Duration::ZERO;
        config
    }

    fn no_prompt() -> PatternSet {
        PatternSet {
            prompt: "^$".to_string(),
            ready: String::new(),
            ignore: String::new(),
            end: DEFAULT_END_REGEX.to_string(),
        }
    }

    fn reports(events: Vec<LineEvent>) -> Vec<TurnReport> {
        events
            .into_iter()
            .filter_map(|event| match event {
                LineEvent::Turn(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    fn run(parser: &mut TurnParser, lines: &[&str]) -> Vec<TurnReport> {
        lines
            .iter()
            .flat_map(|line| reports(parser.handle_line(line)))
            .collect()
    }

    #[test]
    fn test_multiple_turns_split_on_end_marker() {
        let mut parser = TurnParser::new(config(no_prompt()));
        let out = run(&mut parser, &["first", "DONE", "second", "DONE"]);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].turn, 1);
        assert_eq!(out[0].final_report, "first");
        assert_eq!(out[0].status, TurnStatus::TurnCompleteEnd);
        assert!(out[0].ready_for_prompt);
        assert_eq!(out[1].turn, 2);
        assert_eq!(out[1].final_report, "second");
    }

    #[test]
    fn test_session_log_overrides_screen_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(
            &path,
            r#"{"kind":"codex_event","payload":{"msg":{"type":"agent_message","message":"SESSION_OK"}}}"#,
        )
        .unwrap();

        let config = config(no_prompt()).with_session_log(&path, Duration::ZERO);
        let mut parser = TurnParser::new(config);
        let out = run(&mut parser, &["screen text", "DONE"]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].final_report, "SESSION_OK");
    }

    #[test]
    fn test_missing_session_log_keeps_screen_text() {
        let dir = TempDir::new().unwrap();
        let config = config(no_prompt()).with_session_log(dir.path().join("nope"), Duration::ZERO);
        let mut parser = TurnParser::new(config);
        let out = run(&mut parser, &["screen text", "DONE"]);
        assert_eq!(out[0].final_report, "screen text");
    }

    #[test]
    fn test_flush_eof_reports_pending_content() {
        let mut parser = TurnParser::new(config(no_prompt()));
        assert!(run(&mut parser, &["pending"]).is_empty());

        let report = parser.flush_eof().unwrap();
        assert_eq!(report.status, TurnStatus::Eof);
        assert!(!report.ready_for_prompt);
        assert_eq!(report.final_report, "pending");
    }

    #[test]
    fn test_flush_eof_ready() {
        let mut cfg = config(no_prompt());
        cfg.eof_ready = true;
        let mut parser = TurnParser::new(cfg);
        parser.handle_line("pending");

        let report = parser.flush_eof().unwrap();
        assert_eq!(report.status, TurnStatus::TurnCompleteExit);
        assert!(report.ready_for_prompt);
    }

    #[test]
    fn test_flush_eof_disabled() {
        let mut cfg = config(no_prompt());
        cfg.flush_on_eof = false;
        let mut parser = TurnParser::new(cfg);
        parser.handle_line("pending");
        assert!(parser.flush_eof().is_none());

        let mut parser = TurnParser::new(config(no_prompt()));
        parser.handle_line("pending");
        parser.disable_flush();
        assert!(parser.flush_eof().is_none());
    }

    #[test]
    fn test_last_line_mode() {
        let mut parser = TurnParser::new(config(no_prompt()).with_mode(ReportMode::LastLine));
        let out = run(&mut parser, &["first", "second", "DONE"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].final_report, "second");
    }

    #[test]
    fn test_blank_line_keeps_previous_block() {
        let mut parser = TurnParser::new(config(no_prompt()));
        let out = run(&mut parser, &["alpha", "beta", "", "DONE"]);
        assert_eq!(out[0].final_report, "alpha\nbeta");

        let out = run(&mut parser, &["one", "", "two", "three", "DONE"]);
        assert_eq!(out[0].final_report, "two\nthree");
    }

    #[test]
    fn test_prompt_closes_turn_and_empty_turn_is_skipped() {
        let mut parser = TurnParser::new(config(PatternSet {
            ready: String::new(),
            ignore: String::new(),
            ..PatternSet::default()
        }));

        let events = parser.handle_line("> ");
        assert_eq!(events, vec![LineEvent::Prompt]);

        parser.handle_line("answer");
        let events = parser.handle_line("\x1b[1m>\x1b[0m");
        assert_eq!(events.len(), 2);
        match &events[0] {
            LineEvent::Turn(report) => {
                assert_eq!(report.turn, 1);
                assert_eq!(report.status, TurnStatus::TurnComplete);
                assert_eq!(report.final_report, "answer");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], LineEvent::Prompt);
    }

    #[test]
    fn test_ignored_lines_never_become_content() {
        let mut parser = TurnParser::new(config(PatternSet::default()));
        for line in [
            "╭──────────╮",
            "│ >_ OpenAI Codex │",
            "  model: gpt",
            "• Working (3s)",
            "42% context left",
            "› type here",
        ] {
            assert!(parser.handle_line(line).is_empty(), "{line}");
        }
        assert!(!parser.has_content());
    }

    #[test]
    fn test_end_marker_kept_when_not_stripped() {
        let mut cfg = config(no_prompt());
        cfg.strip_end = false;
        let mut parser = TurnParser::new(cfg);
        let out = run(&mut parser, &["body", "DONE"]);
        assert_eq!(out[0].final_report, "body\nDONE");
    }

    #[test]
    fn test_ready_marker_is_signalled_after_output() {
        let mut parser = TurnParser::new(config(PatternSet {
            prompt: "^$".to_string(),
            ready: "(?i)context left".to_string(),
            ignore: String::new(),
            end: String::new(),
        }));
        let events = parser.handle_line("80% Context Left");
        assert_eq!(events, vec![LineEvent::Output, LineEvent::Ready]);
        assert!(parser.has_content());
    }

    #[test]
    fn test_source_and_timestamp_in_report() {
        let mut parser = TurnParser::new(config(no_prompt()).with_source("codex"));
        let out = run(&mut parser, &["x", "DONE"]);
        assert_eq!(out[0].source.as_deref(), Some("codex"));
        assert!(out[0].captured_at.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&out[0].captured_at).is_ok());
    }

    #[test]
    fn test_invalid_patterns_and_mode() {
        let err = ParserConfig::new(&PatternSet {
            end: "(".to_string(),
            ..PatternSet::default()
        })
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("end-regex"));

        assert!("weird".parse::<ReportMode>().is_err());
        assert_eq!(" Last-Line ".parse::<ReportMode>().unwrap(), ReportMode::LastLine);
    }

    #[test]
    fn test_feed_lines_writes_jsonl() {
        let mut parser = TurnParser::new(config(no_prompt()));
        let input = b"hello\r\nDONE\nworld-that-is-long\n".as_slice();
        let mut out = Vec::new();

        let written = feed_lines(&mut parser, input, &mut out, 5).unwrap();
        assert_eq!(written, 2);

        let lines: Vec<TurnReport> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0].final_report, "hello");
        assert_eq!(lines[1].status, TurnStatus::Eof);
        assert_eq!(lines[1].final_report, "world");
    }

    #[test]
    fn test_feed_lines_flushes_before_read_error() {
        use std::io::Read as _;

        struct Broken;
        impl std::io::Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("pipe closed"))
            }
        }

        let mut parser = TurnParser::new(config(no_prompt()));
        let input = std::io::BufReader::new(b"partial\n".as_slice().chain(Broken));
        let mut out = Vec::new();

        let err = feed_lines(&mut parser, input, &mut out, 0).unwrap_err();
        assert!(matches!(err, TurnError::Io(_)));
        assert!(!err.is_config());
        let report: TurnReport = serde_json::from_slice(out.trim_ascii_end()).unwrap();
        assert_eq!(report.status, TurnStatus::Eof);
        assert_eq!(report.final_report, "partial");
    }
}
