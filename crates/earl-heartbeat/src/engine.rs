use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use earl_assistant::{LaunchConfig, PermissionConfig, Registry, Session};
use earl_core::{PermissionMode, ThreadId};
use earl_streaming::{ChatPoster, StreamingResponse};
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use crate::error::{HeartbeatError, Result};
use crate::schedule::compute_next_run;
use crate::types::{HeartbeatDefinition, HeartbeatState};

/// Concurrent read handle over heartbeat runtime state — safe to hold and
/// poll (e.g. for `!status`) alongside the engine's own tick loop.
#[derive(Clone)]
pub struct HeartbeatHandle {
    states: Arc<DashMap<String, HeartbeatState>>,
}

impl HeartbeatHandle {
    pub fn list(&self) -> Vec<HeartbeatState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<HeartbeatState> {
        self.states.get(name).map(|e| e.value().clone())
    }
}

/// Per-run configuration shared across every heartbeat, supplied by the
/// runner rather than living on an individual [`HeartbeatDefinition`].
pub struct RunnerContext {
    pub command: String,
    pub mcp_config_dir: PathBuf,
    /// Used for definitions with `permission_mode: interactive` — the same
    /// permission environment chat-driven sessions run under.
    pub interactive_permission_config: Option<PermissionConfig>,
}

/// Drives every configured heartbeat's tick/dispatch loop (§4.8).
pub struct HeartbeatEngine<P: ChatPoster + 'static> {
    states: Arc<DashMap<String, HeartbeatState>>,
    registry: Arc<Registry>,
    poster: Arc<P>,
    ctx: Arc<RunnerContext>,
}

impl<P: ChatPoster + 'static> HeartbeatEngine<P> {
    pub fn new(
        definitions: Vec<HeartbeatDefinition>,
        registry: Arc<Registry>,
        poster: Arc<P>,
        ctx: RunnerContext,
    ) -> Result<(Self, HeartbeatHandle)> {
        let states = Arc::new(DashMap::new());
        for definition in definitions {
            if states.contains_key(&definition.name) {
                return Err(HeartbeatError::DuplicateName(definition.name));
            }
            states.insert(definition.name.clone(), HeartbeatState::new(definition));
        }

        let handle = HeartbeatHandle {
            states: Arc::clone(&states),
        };

        Ok((
            Self {
                states,
                registry,
                poster,
                ctx: Arc::new(ctx),
            },
            handle,
        ))
    }

    /// Ticks once a second until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("heartbeat engine started");
        let mut interval = tokio::time::interval(StdDuration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch every due, non-running, enabled definition. A still-running
    /// heartbeat never re-dispatches even if due.
    fn tick(&self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .states
            .iter()
            .filter(|e| {
                let s = e.value();
                s.definition.enabled && !s.running && s.next_run_at.is_some_and(|t| t <= now)
            })
            .map(|e| e.key().clone())
            .collect();

        for name in due {
            if let Some(mut entry) = self.states.get_mut(&name) {
                entry.running = true;
                entry.last_run_at = Some(now);
            } else {
                continue;
            }

            let states = Arc::clone(&self.states);
            let registry = Arc::clone(&self.registry);
            let poster = Arc::clone(&self.poster);
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                dispatch(name, states, registry, poster, ctx).await;
            });
        }
    }
}

/// Run one heartbeat to completion: announce, start/resume its session,
/// stream the reply, enforce the timeout, then finalize its state.
///
/// A heartbeat's registry key (stable across runs, so a `persistent`
/// definition resumes the same assistant session) is deliberately distinct
/// from its per-run chat thread (the header post just created, which is
/// where `StreamingResponse` actually posts and edits).
async fn dispatch<P: ChatPoster + 'static>(
    name: String,
    states: Arc<DashMap<String, HeartbeatState>>,
    registry: Arc<Registry>,
    poster: Arc<P>,
    ctx: Arc<RunnerContext>,
) {
    let Some(definition) = states.get(&name).map(|s| s.definition.clone()) else {
        return;
    };

    let registry_key = ThreadId::from(format!("heartbeat:{}", definition.name));
    let header_text = format!("\u{1FAC0} Starting heartbeat **{}**", definition.name);

    // Passing the channel id as the thread id signals "no thread yet, post a
    // new root" per the ChatPoster contract — the registry key is an
    // assistant-session identity, not a chat post, so it can't be reused here.
    let new_thread_sentinel = ThreadId::from(definition.channel_id.as_str());
    let header_post_id = poster
        .create_post(&definition.channel_id, &new_thread_sentinel, &header_text)
        .await;

    let Some(header_post_id) = header_post_id else {
        finalize(&states, &name, Some("failed to post heartbeat announcement".to_string()));
        return;
    };

    let chat_thread = ThreadId::from(header_post_id);
    let streaming = StreamingResponse::new(
        Arc::clone(&poster),
        definition.channel_id.clone(),
        chat_thread.clone(),
    );

    let (skip_permissions, permission_config) = match definition.permission_mode {
        PermissionMode::Auto => (true, None),
        PermissionMode::Interactive => (false, ctx.interactive_permission_config.clone()),
    };

    let launch = LaunchConfig {
        command: ctx.command.clone(),
        working_dir: definition.working_dir.display().to_string(),
        channel_id: definition.channel_id.as_str().to_string(),
        model_override: None,
        skip_permissions,
        permission_config,
        durable_memory: None,
        mcp_config_dir: ctx.mcp_config_dir.clone(),
    };

    let session = match registry.get_or_create(registry_key.as_str(), launch).await {
        Ok(session) => session,
        Err(e) => {
            error!(heartbeat = %name, error = %e, "failed to start heartbeat session");
            streaming.on_complete().await;
            finalize(&states, &name, Some(e.to_string()));
            return;
        }
    };

    if let Some(mut entry) = states.get_mut(&name) {
        entry.run_thread = Some(chat_thread);
        entry.session_id = Some(session.claude_session_id.clone());
    }

    let (done_tx, done_rx) = oneshot::channel::<()>();
    wire_callbacks(&session, &streaming, done_tx);

    if !session.send_turn(&definition.prompt).await {
        teardown(&registry, &registry_key, definition.persistent, &session).await;
        streaming.on_complete().await;
        finalize(&states, &name, Some("failed to send heartbeat prompt".to_string()));
        return;
    }

    let error = match tokio::time::timeout(
        StdDuration::from_secs(definition.timeout_seconds),
        done_rx,
    )
    .await
    {
        Ok(Ok(())) => None,
        Ok(Err(_)) => Some("session closed before completing".to_string()),
        Err(_) => Some(format!("timed out after {}s", definition.timeout_seconds)),
    };

    teardown(&registry, &registry_key, definition.persistent, &session).await;
    streaming.on_complete().await;
    finalize(&states, &name, error);
}

/// Glue the session's sync callbacks to the async `StreamingResponse` by
/// spawning a short task per event; `on_complete` instead signals `done_tx`
/// so the dispatcher can bound the whole run with a timeout.
fn wire_callbacks<P: ChatPoster + 'static>(
    session: &Session,
    streaming: &Arc<StreamingResponse<P>>,
    done_tx: oneshot::Sender<()>,
) {
    {
        let streaming = Arc::clone(streaming);
        session.on_text(move |chunk: &str| {
            let streaming = Arc::clone(&streaming);
            let chunk = chunk.to_string();
            tokio::spawn(async move { streaming.on_text(&chunk).await });
        });
    }
    {
        let streaming = Arc::clone(streaming);
        session.on_tool_use(move |tool_use| {
            let streaming = Arc::clone(&streaming);
            let tool_use = tool_use.clone();
            tokio::spawn(async move { streaming.on_tool_use(&tool_use).await });
        });
    }
    {
        let streaming = Arc::clone(streaming);
        session.on_tool_result(move |refs| {
            let streaming = Arc::clone(&streaming);
            let images = refs.images.clone();
            tokio::spawn(async move { streaming.on_tool_result(&images).await });
        });
    }

    let done_tx = std::sync::Mutex::new(Some(done_tx));
    session.on_complete(move |_stats| {
        if let Some(tx) = done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    });
}

async fn teardown(registry: &Registry, registry_key: &ThreadId, persistent: bool, session: &Session) {
    if persistent {
        session.kill().await;
    } else {
        registry.stop_session(registry_key.as_str()).await;
    }
}

fn finalize(states: &DashMap<String, HeartbeatState>, name: &str, error: Option<String>) {
    let Some(mut entry) = states.get_mut(name) else {
        return;
    };
    let now = Utc::now();
    entry.running = false;
    entry.last_completed_at = Some(now);
    entry.run_count += 1;
    entry.last_error = error;
    entry.next_run_at = compute_next_run(&entry.definition.schedule, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;
    use async_trait::async_trait;
    use earl_core::ChannelId;
    use earl_sessions::Store;
    use std::path::PathBuf as StdPathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct FakePoster {
        creates: AtomicUsize,
        last_body: TokioMutex<Option<String>>,
    }

    #[async_trait]
    impl ChatPoster for FakePoster {
        async fn create_post(&self, _channel_id: &ChannelId, _thread_id: &ThreadId, text: &str) -> Option<String> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            *self.last_body.lock().await = Some(text.to_string());
            Some(format!("post-{n}"))
        }

        async fn update_post(&self, _post_id: &str, text: &str) -> bool {
            *self.last_body.lock().await = Some(text.to_string());
            true
        }

        async fn delete_post(&self, _post_id: &str) -> bool {
            true
        }

        async fn typing(&self, _channel_id: &ChannelId) -> bool {
            true
        }

        async fn upload_file(&self, _channel_id: &ChannelId, _path: &str) -> Option<String> {
            None
        }

        async fn create_file_post(
            &self,
            _channel_id: &ChannelId,
            _thread_id: &ThreadId,
            _file_ids: &[String],
        ) -> Option<String> {
            None
        }
    }

    fn definition(name: &str, enabled: bool) -> HeartbeatDefinition {
        HeartbeatDefinition {
            name: name.to_string(),
            description: "test heartbeat".to_string(),
            schedule: Schedule::Interval { seconds: 60 },
            channel_id: ChannelId::from("chan"),
            working_dir: StdPathBuf::from("/tmp"),
            prompt: "say hi".to_string(),
            permission_mode: PermissionMode::Auto,
            persistent: false,
            timeout_seconds: 5,
            enabled,
        }
    }

    #[test]
    fn new_rejects_duplicate_definition_names() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Arc::new(Registry::new(store));
        let poster = Arc::new(FakePoster::default());
        let ctx = RunnerContext {
            command: "true".to_string(),
            mcp_config_dir: StdPathBuf::from("/tmp"),
            interactive_permission_config: None,
        };

        let result = HeartbeatEngine::new(
            vec![definition("a", true), definition("a", true)],
            registry,
            poster,
            ctx,
        );
        assert!(matches!(result, Err(HeartbeatError::DuplicateName(n)) if n == "a"));
    }

    #[test]
    fn handle_lists_every_definition() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Arc::new(Registry::new(store));
        let poster = Arc::new(FakePoster::default());
        let ctx = RunnerContext {
            command: "true".to_string(),
            mcp_config_dir: StdPathBuf::from("/tmp"),
            interactive_permission_config: None,
        };

        let (_engine, handle) = HeartbeatEngine::new(
            vec![definition("a", true), definition("b", false)],
            registry,
            poster,
            ctx,
        )
        .unwrap();

        assert_eq!(handle.list().len(), 2);
        assert!(handle.get("a").is_some());
        assert!(handle.get("missing").is_none());
    }

    #[tokio::test]
    async fn disabled_definition_never_ticks_due() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("sessions.json"));
        let registry = Arc::new(Registry::new(store));
        let poster = Arc::new(FakePoster::default());
        let ctx = RunnerContext {
            command: "true".to_string(),
            mcp_config_dir: StdPathBuf::from("/tmp"),
            interactive_permission_config: None,
        };

        let (engine, handle) =
            HeartbeatEngine::new(vec![definition("a", false)], registry, poster, ctx).unwrap();

        // Force it due, then tick — a disabled definition must not dispatch.
        engine.states.get_mut("a").unwrap().next_run_at = Some(Utc::now());
        engine.tick();

        assert!(!handle.get("a").unwrap().running);
    }
}
