//! CLI command for `relay turns`.
//!
//! Without `--command` the parser reads stdin line by line. With it, the
//! command runs under a PTY and prompts are fed one turn at a time.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use relay_adapters::{DEFAULT_BUFFER_BYTES, PtyTurnConfig, PtyTurnRunner};
use relay_core::turns::{
    DEFAULT_END_REGEX, DEFAULT_IGNORE_REGEX, DEFAULT_PROMPT_REGEX, DEFAULT_READY_REGEX,
    ParserConfig, PatternSet, ReportMode, TurnParser, decode_escapes, feed_lines,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::ConfigError;
use crate::duration::parse_duration;

/// Segment interactive CLI output into one JSON report per turn.
#[derive(Parser, Debug)]
pub struct TurnsArgs {
    /// Command to run under a PTY (enables active parsing)
    #[arg(long)]
    pub command: Option<String>,

    /// Prompt to send (repeatable, PTY mode)
    #[arg(long = "prompt", value_name = "TEXT")]
    pub prompts: Vec<String>,

    /// File with one prompt per line, appended after --prompt values
    #[arg(long, value_name = "FILE")]
    pub prompt_file: Option<PathBuf>,

    /// Regex that marks the start of a new turn
    #[arg(long, default_value = DEFAULT_PROMPT_REGEX, value_name = "REGEX")]
    pub prompt_regex: String,

    /// Regex that indicates the CLI is ready for the next prompt (blank disables)
    #[arg(long, default_value = DEFAULT_READY_REGEX, value_name = "REGEX")]
    pub ready_regex: String,

    /// Regex for lines to ignore (blank disables)
    #[arg(long, default_value = DEFAULT_IGNORE_REGEX, value_name = "REGEX")]
    pub ignore_regex: String,

    /// Regex that marks end-of-turn output (blank disables)
    #[arg(long, default_value = DEFAULT_END_REGEX, value_name = "REGEX")]
    pub end_regex: String,

    /// Report mode: block (last non-empty block) or last-line
    #[arg(long, default_value = "block")]
    pub mode: String,

    /// Source label added to every report
    #[arg(long, default_value = "")]
    pub source: String,

    /// Strip ANSI escape sequences
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub strip_ansi: bool,

    /// Max line length to buffer
    #[arg(long, default_value_t = DEFAULT_BUFFER_BYTES)]
    pub buffer_bytes: usize,

    /// Emit a final report on EOF
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub flush_on_eof: bool,

    /// Report EOF as turn_complete_exit and ready for the next prompt
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub eof_ready: bool,

    /// Strip the end marker line from the final report
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub strip_end: bool,

    /// Send `exit` after the last prompt (PTY mode)
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub send_exit: bool,

    /// Wait for readiness before the first prompt (PTY mode)
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub wait_ready: bool,

    /// Send prompts as bracketed paste (PTY mode)
    #[arg(long, default_value_t = false, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub bracketed_paste: bool,

    /// Delay before each prompt (PTY mode)
    #[arg(long, default_value = "200ms", value_parser = parse_duration, value_name = "DURATION")]
    pub prompt_delay: Duration,

    /// Delay between typed characters, 0 writes prompts at once (PTY mode)
    #[arg(long, default_value = "0", value_parser = parse_duration, value_name = "DURATION")]
    pub type_delay: Duration,

    /// Delay before the first prompt (PTY mode)
    #[arg(long, default_value = "800ms", value_parser = parse_duration, value_name = "DURATION")]
    pub start_delay: Duration,

    /// Quiet time that completes an active turn, 0 disables (PTY mode)
    #[arg(long, default_value = "2s", value_parser = parse_duration, value_name = "DURATION")]
    pub idle_timeout: Duration,

    /// Longest wait for readiness or a turn to complete (PTY mode)
    #[arg(long, default_value = "2m", value_parser = parse_duration, value_name = "DURATION")]
    pub turn_timeout: Duration,

    /// Escape sequence written after each prompt, e.g. "\r" or "\x1b[13u"
    #[arg(long, default_value = "\\r", value_name = "SEQ")]
    pub submit_seq: String,

    /// Codex TUI session log whose agent messages replace the report text
    #[arg(long, value_name = "FILE")]
    pub session_log: Option<PathBuf>,

    /// How long to wait for the next session log message
    #[arg(long, default_value = "2s", value_parser = parse_duration, value_name = "DURATION")]
    pub session_log_wait: Duration,

    /// Append raw PTY output to this file (PTY mode)
    #[arg(long, value_name = "FILE")]
    pub raw_log: Option<PathBuf>,

    /// Stop after N reports, 0 means no limit (PTY mode)
    #[arg(long, default_value_t = 0)]
    pub max_turns: usize,

    /// Grace period between SIGTERM and SIGKILL (PTY mode)
    #[arg(long, default_value = "2s", value_parser = parse_duration, value_name = "DURATION")]
    pub exit_grace: Duration,

    /// TERM for the child (PTY mode)
    #[arg(long, default_value = "xterm-256color")]
    pub term: String,

    /// LANG and LC_ALL for the child (PTY mode)
    #[arg(long, default_value = "en_US.UTF-8")]
    pub lang: String,
}

impl TurnsArgs {
    /// Compiles the patterns and behavior flags. Fails before any I/O.
    pub fn parser_config(&self) -> Result<ParserConfig> {
        let patterns = PatternSet {
            prompt: self.prompt_regex.clone(),
            ready: self.ready_regex.clone(),
            ignore: self.ignore_regex.clone(),
            end: self.end_regex.clone(),
        };
        let mode: ReportMode = self.mode.parse()?;
        let mut config = ParserConfig::new(&patterns)?
            .with_mode(mode)
            .with_source(self.source.clone());
        config.strip_ansi = self.strip_ansi;
        config.flush_on_eof = self.flush_on_eof;
        config.eof_ready = self.eof_ready;
        config.strip_end = self.strip_end;
        config.session_log_wait = self.session_log_wait;
        if let Some(path) = self.session_log.as_ref().filter(|p| !is_blank(p)) {
            config = config.with_session_log(path, self.session_log_wait);
        }
        Ok(config)
    }

    /// `--prompt` values followed by the non-blank lines of `--prompt-file`.
    pub fn all_prompts(&self) -> Result<Vec<String>> {
        let mut prompts = self.prompts.clone();
        if let Some(path) = &self.prompt_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ConfigError(format!("prompt-file read error: {}: {e}", path.display()))
            })?;
            prompts.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(prompts)
    }

    fn pty_config(&self, command: String) -> Result<PtyTurnConfig> {
        Ok(PtyTurnConfig {
            command,
            prompts: self.all_prompts()?,
            cwd: None,
            term: self.term.clone(),
            lang: self.lang.clone(),
            start_delay: self.start_delay,
            prompt_delay: self.prompt_delay,
            type_delay: self.type_delay,
            bracketed_paste: self.bracketed_paste,
            submit_seq: decode_escapes(&self.submit_seq),
            wait_ready: self.wait_ready,
            send_exit: self.send_exit,
            idle_timeout: self.idle_timeout,
            turn_timeout: self.turn_timeout,
            max_turns: self.max_turns,
            exit_grace: self.exit_grace,
            buffer_bytes: self.buffer_bytes,
            raw_log: self.raw_log.clone().filter(|p| !is_blank(p)),
        })
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}

pub async fn execute(args: TurnsArgs) -> Result<()> {
    let config = args.parser_config()?;
    let parser = TurnParser::new(config);

    let command = args
        .command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let Some(command) = command else {
        return read_stdin(parser, args.buffer_bytes).await;
    };

    let pty_config = args.pty_config(command)?;
    info!(
        command = %pty_config.command,
        prompts = pty_config.prompts.len(),
        max_turns = pty_config.max_turns,
        "starting PTY session"
    );
    let outcome = PtyTurnRunner::new(pty_config, parser)
        .run(std::io::stdout())
        .await?;

    if outcome.timed_out {
        warn!(reports = outcome.reports.len(), "timed out waiting for a turn");
    }
    info!(
        reports = outcome.reports.len(),
        exit_code = ?outcome.exit_code,
        max_turns_reached = outcome.max_turns_reached,
        "PTY session finished"
    );
    Ok(())
}

async fn read_stdin(mut parser: TurnParser, buffer_bytes: usize) -> Result<()> {
    let written = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin().lock();
        let mut stdout = std::io::stdout().lock();
        feed_lines(&mut parser, stdin, &mut stdout, buffer_bytes)
    })
    .await
    .context("stdin reader panicked")??;
    info!(reports = written, "stdin closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> TurnsArgs {
        TurnsArgs::try_parse_from(std::iter::once("turns").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_match_runner_defaults() {
        let args = parse(&[]);
        let pty = args.pty_config("cat".to_string()).unwrap();
        let defaults = PtyTurnConfig::default();

        assert_eq!(pty.start_delay, defaults.start_delay);
        assert_eq!(pty.prompt_delay, defaults.prompt_delay);
        assert_eq!(pty.idle_timeout, defaults.idle_timeout);
        assert_eq!(pty.turn_timeout, defaults.turn_timeout);
        assert_eq!(pty.exit_grace, defaults.exit_grace);
        assert_eq!(pty.submit_seq, b"\r");
        assert_eq!(pty.term, defaults.term);
        assert_eq!(pty.lang, defaults.lang);
        assert!(pty.wait_ready && pty.send_exit && !pty.bracketed_paste);

        let config = args.parser_config().unwrap();
        assert!(config.strip_ansi && config.flush_on_eof && config.strip_end);
        assert!(!config.eof_ready);
        assert_eq!(config.mode, ReportMode::Block);
        assert_eq!(config.session_log_wait, Duration::from_secs(2));
        assert!(config.source.is_none());
    }

    #[test]
    fn test_bool_flags_take_optional_value() {
        let args = parse(&["--strip-ansi=false", "--eof-ready", "--send-exit=false"]);
        assert!(!args.strip_ansi);
        assert!(args.eof_ready);
        assert!(!args.send_exit);
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let args = parse(&["--end-regex", "(unclosed"]);
        let err = args.parser_config().unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
        assert!(err.to_string().contains("end-regex"));
    }

    #[test]
    fn test_invalid_mode_is_config_error() {
        let err = parse(&["--mode", "paragraph"]).parser_config().unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
    }

    #[test]
    fn test_blank_optional_regex_disables_it() {
        let config = parse(&["--ready-regex", "", "--ignore-regex", " "])
            .parser_config()
            .unwrap();
        assert!(config.ready.is_none());
        assert!(config.ignore.is_none());
        assert!(config.end.is_some());
    }

    #[test]
    fn test_prompt_file_appends_non_blank_lines() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("prompts.txt");
        std::fs::write(&file, "  second \n\n third\n").unwrap();

        let args = parse(&[
            "--prompt",
            "first",
            "--prompt-file",
            file.to_str().unwrap(),
        ]);
        assert_eq!(args.all_prompts().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn test_missing_prompt_file_is_config_error() {
        let args = parse(&["--prompt-file", "/nonexistent/prompts.txt"]);
        let err = args.all_prompts().unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
    }

    #[test]
    fn test_submit_seq_is_decoded() {
        let args = parse(&["--submit-seq", "\\x1b[13u"]);
        let pty = args.pty_config("cat".to_string()).unwrap();
        assert_eq!(pty.submit_seq, b"\x1b[13u");
    }

    #[test]
    fn test_session_log_sets_overlay() {
        let args = parse(&["--session-log", "/tmp/s.jsonl", "--session-log-wait", "500ms"]);
        let config = args.parser_config().unwrap();
        assert_eq!(config.session_log, Some(PathBuf::from("/tmp/s.jsonl")));
        assert_eq!(config.session_log_wait, Duration::from_millis(500));
    }
}
