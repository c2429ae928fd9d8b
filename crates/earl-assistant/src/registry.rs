use std::collections::HashMap;
use std::sync::Arc;

use earl_sessions::{PersistedSession, Store};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::session::{LaunchConfig, Session, SessionMode};

/// Maps thread ids to their live [`Session`], keeping the on-disk
/// [`Store`] in sync so sessions survive a process restart.
///
/// Exactly one live `Session` per thread at a time: `get_or_create` never
/// spawns a second process for a thread that already has one.
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    store: Store,
}

impl Registry {
    pub fn new(store: Store) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn get(&self, thread_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(thread_id).cloned()
    }

    /// Return the thread's live session, resuming its persisted
    /// `claude_session_id` if one exists, or spawning a fresh one otherwise.
    pub async fn get_or_create(
        &self,
        thread_id: &str,
        mut launch: LaunchConfig,
    ) -> crate::error::Result<Arc<Session>> {
        if let Some(existing) = self.get(thread_id).await {
            if existing.alive() {
                return Ok(existing);
            }
            self.sessions.write().await.remove(thread_id);
        }

        let persisted = self.store.get(thread_id);
        launch.channel_id = persisted
            .as_ref()
            .map(|p| p.channel_id.clone())
            .unwrap_or(launch.channel_id);

        let (mode, resume_id) = match &persisted {
            Some(p) => (SessionMode::Resume, Some(p.claude_session_id.clone())),
            None => (SessionMode::Fresh, None),
        };

        let mut session = match Session::start(launch.clone(), mode, resume_id.clone()).await {
            Ok(session) => session,
            Err(e) if mode == SessionMode::Resume => {
                warn!(thread_id, error = %e, "resume failed, falling back to a fresh session");
                Session::start(launch, SessionMode::Fresh, None).await?
            }
            Err(e) => return Err(e),
        };
        session.thread_id = thread_id.to_string();

        let session = Arc::new(session);

        let record = PersistedSession::new(
            session.claude_session_id.clone(),
            thread_id.to_string(),
            session.channel_id.clone(),
            session.working_dir.clone(),
        );
        self.store
            .upsert(record)
            .map_err(|e| crate::error::SessionError::Store(e.to_string()))?;

        self.sessions
            .write()
            .await
            .insert(thread_id.to_string(), Arc::clone(&session));

        Ok(session)
    }

    /// Resume every non-paused persisted session at startup. Failures on an
    /// individual entry are logged and skipped rather than aborting the rest.
    pub async fn resume_all(&self, base_launch: impl Fn(&PersistedSession) -> LaunchConfig) {
        let doc = self.store.load();
        for persisted in doc.sessions.values().filter(|s| !s.is_paused) {
            let launch = base_launch(persisted);
            match Session::start(
                launch,
                SessionMode::Resume,
                Some(persisted.claude_session_id.clone()),
            )
            .await
            {
                Ok(mut session) => {
                    session.thread_id = persisted.thread_id.clone();
                    info!(thread_id = %persisted.thread_id, "resumed session on startup");
                    self.sessions
                        .write()
                        .await
                        .insert(persisted.thread_id.clone(), Arc::new(session));
                }
                Err(e) => {
                    warn!(thread_id = %persisted.thread_id, error = %e, "failed to resume session on startup, skipping");
                }
            }
        }
    }

    /// Kill and forget a thread's session, removing it from persisted state.
    pub async fn stop_session(&self, thread_id: &str) {
        if let Some(session) = self.sessions.write().await.remove(thread_id) {
            session.kill().await;
        }
        let _ = self.store.remove(thread_id);
    }

    /// Kill every live session and mark each as paused in the store, for a
    /// graceful shutdown that can later be resumed.
    pub async fn pause_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (thread_id, session) in sessions {
            session.kill().await;
            let _ = self.store.update(&thread_id, |record| {
                record.is_paused = true;
            });
        }
    }

    pub fn touch(&self, thread_id: &str) {
        let _ = self.store.update(thread_id, |record| record.touch());
    }

    /// Roll a session's live stats snapshot into its persisted record.
    pub async fn save_stats(&self, thread_id: &str) {
        let Some(session) = self.get(thread_id).await else {
            return;
        };
        let stats = session.stats_snapshot();
        let _ = self.store.update(thread_id, |record| {
            record.message_count += 1;
            record.total_cost = stats.lifetime_cost;
            record.total_input_tokens = stats.lifetime_input_tokens;
            record.total_output_tokens = stats.lifetime_output_tokens;
        });
    }

    pub fn claude_session_id_for(&self, thread_id: &str) -> Option<String> {
        self.store.get(thread_id).map(|p| p.claude_session_id)
    }

    /// Every persisted session record, for `!status`/idle-reaper iteration.
    pub fn persisted_sessions(&self) -> Vec<PersistedSession> {
        self.store.load().sessions.into_values().collect()
    }

    pub async fn is_alive(&self, thread_id: &str) -> bool {
        self.get(thread_id).await.is_some_and(|s| s.alive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn launch_for(thread_id: &str) -> LaunchConfig {
        LaunchConfig {
            command: "true".to_string(),
            working_dir: "/tmp".to_string(),
            channel_id: format!("chan-{thread_id}"),
            model_override: None,
            skip_permissions: true,
            permission_config: None,
            durable_memory: None,
            mcp_config_dir: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn get_or_create_spawns_and_persists_a_fresh_session() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Registry::new(store);

        let session = registry
            .get_or_create("thread-1", launch_for("thread-1"))
            .await
            .unwrap();
        assert_eq!(session.thread_id, "thread-1");
        assert!(registry.claude_session_id_for("thread-1").is_some());
    }

    #[tokio::test]
    async fn get_or_create_reuses_live_session() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Registry::new(store);

        let first = registry
            .get_or_create("thread-1", launch_for("thread-1"))
            .await
            .unwrap();
        let second = registry
            .get_or_create("thread-1", launch_for("thread-1"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn stop_session_removes_from_store() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Registry::new(store);

        registry
            .get_or_create("thread-1", launch_for("thread-1"))
            .await
            .unwrap();
        registry.stop_session("thread-1").await;
        assert!(registry.claude_session_id_for("thread-1").is_none());
        assert!(registry.get("thread-1").await.is_none());
    }

    #[tokio::test]
    async fn persisted_sessions_lists_every_record_and_is_alive_reflects_liveness() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Registry::new(store);

        registry
            .get_or_create("thread-1", launch_for("thread-1"))
            .await
            .unwrap();
        assert_eq!(registry.persisted_sessions().len(), 1);
        assert!(registry.is_alive("thread-1").await);
        assert!(!registry.is_alive("missing").await);
    }
}
