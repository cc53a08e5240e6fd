//! # relay-adapters
//!
//! Runs interactive CLI agents under a pseudo-terminal and turns their
//! output into one JSON report per conversational turn.
//!
//! The line classification lives in [`relay_core::turns`]; this crate owns
//! the process side: PTY allocation via `portable-pty`, the reader thread,
//! idle detection, prompt pacing and child shutdown.

mod error;
mod pty_turns;

pub use error::{PtyError, Result};
pub use pty_turns::{
    DEFAULT_BUFFER_BYTES, PTY_COLS, PTY_ROWS, PtyTurnConfig, PtyTurnOutcome, PtyTurnRunner,
};
