//! [`SessionDirectory`] adapter wiring `earl-commands`'s `!status`/`!stop`
//! seam to the live [`Registry`].

use std::sync::Arc;

use async_trait::async_trait;
use earl_assistant::Registry;
use earl_commands::SessionDirectory;
use earl_core::ThreadId;

pub struct GatewaySessionDirectory {
    registry: Arc<Registry>,
}

impl GatewaySessionDirectory {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SessionDirectory for GatewaySessionDirectory {
    async fn status_lines(&self) -> Vec<String> {
        let mut sessions = self.registry.persisted_sessions();
        sessions.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));

        let mut lines = Vec::with_capacity(sessions.len());
        for session in sessions {
            let status = if session.is_paused {
                "paused"
            } else if self.registry.is_alive(&session.thread_id).await {
                "running"
            } else {
                "stopped"
            };
            lines.push(format!(
                "`{}` — {} — {} messages, ${:.4}, last activity {}",
                session.thread_id, status, session.message_count, session.total_cost, session.last_activity_at
            ));
        }
        lines
    }

    async fn stop(&self, thread_id: &ThreadId) -> bool {
        let was_tracked = self.registry.is_alive(thread_id.as_str()).await;
        self.registry.stop_session(thread_id.as_str()).await;
        was_tracked
    }
}
