//! earl-terminal — observes externally created terminal-multiplexer panes
//! (§4.9 Terminal Monitor) and relays their state into chat.
//!
//! Unlike a PTY-owning terminal manager, this crate never spawns or drives a
//! shell itself: callers register a [`types::TerminalSessionInfo`] for a pane
//! some other process already created (typically via `tmux new-session`), and
//! [`monitor::Monitor`] polls it through the narrow [`adapter::TmuxAdapter`]
//! seam — classifying output, alerting on state changes, and relaying
//! question/permission reactions back as keystrokes.

pub mod adapter;
pub mod classify;
pub mod error;
pub mod monitor;
pub mod truncate;
pub mod types;

pub use adapter::{Tmux, TmuxAdapter};
pub use classify::{classify, parse_question, PaneState, StallTracker, DEFAULT_STALL_THRESHOLD};
pub use error::{Result, TerminalError};
pub use monitor::Monitor;
pub use types::{PendingKind, PendingTerminalInteraction, TerminalSessionInfo};
