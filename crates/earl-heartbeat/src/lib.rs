//! Cron/interval-driven autonomous sessions (§4.8 Heartbeat Scheduler).
//!
//! Definitions come from config. [`engine::HeartbeatEngine`] owns a single
//! 1-second tick loop; each due, non-running, enabled definition dispatches
//! onto its own worker task that announces the run in chat, starts or
//! resumes an `earl-assistant` [`earl_assistant::Session`], and streams the
//! reply through the same [`earl_streaming::StreamingResponse`] mechanics a
//! chat-driven turn uses.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{HeartbeatEngine, HeartbeatHandle, RunnerContext};
pub use error::{HeartbeatError, Result};
pub use schedule::compute_next_run;
pub use types::{HeartbeatDefinition, HeartbeatState, Schedule};
