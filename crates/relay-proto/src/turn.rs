//! Records emitted by the PTY turn parser.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a turn was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// A prompt line was seen.
    TurnComplete,
    /// The end-of-turn marker was seen.
    TurnCompleteEnd,
    /// A readiness marker arrived while a turn had content.
    TurnCompleteReady,
    /// The stream went quiet for the idle timeout.
    TurnCompleteIdle,
    /// Stream ended; the child may not accept more input.
    Eof,
    /// Stream ended and the caller asked to treat that as ready.
    TurnCompleteExit,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnComplete => "turn_complete",
            Self::TurnCompleteEnd => "turn_complete_end",
            Self::TurnCompleteReady => "turn_complete_ready",
            Self::TurnCompleteIdle => "turn_complete_idle",
            Self::Eof => "eof",
            Self::TurnCompleteExit => "turn_complete_exit",
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    /// 1-based, strictly increasing.
    pub turn: u64,
    /// RFC 3339 UTC timestamp.
    pub captured_at: String,
    pub status: TurnStatus,
    pub ready_for_prompt: bool,
    pub final_report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TurnStatus::TurnCompleteIdle).unwrap();
        assert_eq!(json, "\"turn_complete_idle\"");
        assert_eq!(TurnStatus::Eof.as_str(), "eof");
    }

    #[test]
    fn test_report_omits_missing_source() {
        let report = TurnReport {
            turn: 1,
            captured_at: "2026-01-01T00:00:00Z".to_string(),
            status: TurnStatus::TurnComplete,
            ready_for_prompt: true,
            final_report: "done".to_string(),
            source: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"{"turn":1,"captured_at":"2026-01-01T00:00:00Z","status":"turn_complete","ready_for_prompt":true,"final_report":"done"}"#
        );
    }
}
