//! Shared data types for the terminal monitor.

use earl_core::{ChannelId, ThreadId};

/// A pre-registered terminal-multiplexer pane the monitor watches (§3
/// TerminalSessionInfo).
#[derive(Debug, Clone)]
pub struct TerminalSessionInfo {
    /// The multiplexer session key (e.g. a `tmux` session name).
    pub name: String,
    pub channel_id: ChannelId,
    pub thread_id: ThreadId,
    pub working_dir: String,
    /// The prompt or task description this pane was started to run.
    pub prompt: String,
    pub created_at: u64,
}

/// What kind of chat interaction is currently pending for a registered pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// Waiting on a numbered-option reaction (`:one:`..`:four:`).
    Question,
    /// Waiting on an allow/deny reaction.
    Permission,
}

/// A posted chat prompt awaiting a user reaction, keyed by post id (§4.9.4).
#[derive(Debug, Clone)]
pub struct PendingTerminalInteraction {
    pub session_name: String,
    pub kind: PendingKind,
}
