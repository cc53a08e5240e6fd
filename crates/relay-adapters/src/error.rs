use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    /// The pseudo-terminal could not be opened or the child not started.
    #[error("pty start error: {0}")]
    Spawn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;
