//! Turn segmentation for interactive CLI output.
//!
//! The parser consumes logical lines (from a PTY or stdin), classifies each
//! as prompt, blank, ignorable, end marker, readiness marker or content, and
//! produces one [`TurnReport`](relay_proto::TurnReport) per completed turn.
//! It does no terminal I/O itself: callers feed lines and act on the
//! returned [`LineEvent`]s.

mod ansi;
mod escapes;
mod parser;
mod session_log;

pub use ansi::strip_ansi;
pub use escapes::decode_escapes;
pub use parser::{
    DEFAULT_END_REGEX, DEFAULT_IGNORE_REGEX, DEFAULT_PROMPT_REGEX, DEFAULT_READY_REGEX, LineEvent,
    ParserConfig, PatternSet, ReportMode, TurnParser, feed_lines, write_report,
};
pub use session_log::{SessionLog, read_agent_messages};

use thiserror::Error;

/// Configuration and I/O failures of the turn parser.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("invalid {flag}: {source}")]
    InvalidRegex {
        flag: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("invalid mode: {0} (expected block or last-line)")]
    InvalidMode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TurnError {
    /// Configuration problems map to exit code 2, everything else to 1.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidRegex { .. } | Self::InvalidMode(_))
    }
}

pub type Result<T> = std::result::Result<T, TurnError>;
