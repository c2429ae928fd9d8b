use serde::{Deserialize, Serialize};

/// Durable snapshot of one thread's session metadata (PersistedSession).
///
/// Tolerant of unknown fields on read — `#[serde(default)]` everywhere a
/// field could plausibly be absent from an older document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSession {
    pub claude_session_id: String,
    pub thread_id: String,
    pub channel_id: String,
    pub working_dir: String,
    pub started_at: String,
    pub last_activity_at: String,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
}

impl PersistedSession {
    pub fn new(
        claude_session_id: impl Into<String>,
        thread_id: impl Into<String>,
        channel_id: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            claude_session_id: claude_session_id.into(),
            thread_id: thread_id.into(),
            channel_id: channel_id.into(),
            working_dir: working_dir.into(),
            started_at: now.clone(),
            last_activity_at: now,
            is_paused: false,
            message_count: 0,
            total_cost: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Whole-document shape persisted to `sessions.json`: a map keyed by thread
/// id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionsDocument {
    #[serde(default)]
    pub sessions: std::collections::HashMap<String, PersistedSession>,
}
