use std::path::PathBuf;

use chrono::{DateTime, Utc};
use earl_core::{ChannelId, PermissionMode, ThreadId};
use serde::{Deserialize, Serialize};

/// How a heartbeat decides when it's next due.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Standard cron expression (seconds-first, per the `cron` crate),
    /// evaluated in UTC.
    Cron { expression: String },
    /// Fixed interval counted from the previous run.
    Interval { seconds: u64 },
}

/// A heartbeat as declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatDefinition {
    pub name: String,
    pub description: String,
    pub schedule: Schedule,
    pub channel_id: ChannelId,
    pub working_dir: PathBuf,
    pub prompt: String,
    pub permission_mode: PermissionMode,
    pub persistent: bool,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

/// Runtime state for one definition, owned exclusively by the engine's tick
/// loop (readers go through [`super::engine::HeartbeatHandle`]).
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    pub definition: HeartbeatDefinition,
    pub next_run_at: Option<DateTime<Utc>>,
    pub running: bool,
    pub run_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_thread: Option<ThreadId>,
    pub session_id: Option<String>,
}

impl HeartbeatState {
    pub fn new(definition: HeartbeatDefinition) -> Self {
        let next_run_at = crate::schedule::compute_next_run(&definition.schedule, Utc::now());
        Self {
            definition,
            next_run_at,
            running: false,
            run_count: 0,
            last_run_at: None,
            last_completed_at: None,
            last_error: None,
            run_thread: None,
            session_id: None,
        }
    }
}
