//! Error types for the terminal monitor.

use thiserror::Error;

/// All errors that can originate from terminal-monitor operations.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The named multiplexer session does not exist in the monitor's registry.
    #[error("terminal session not registered: {0}")]
    SessionNotFound(String),

    /// The `tmux` CLI invocation itself failed (spawn or non-zero exit).
    #[error("tmux adapter error: {0}")]
    Adapter(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TerminalError>;
