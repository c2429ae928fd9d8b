//! `Runner` (§4.10 Runner / Orchestrator): the one struct holding every
//! subsystem handle, grounded on the teacher's `AppState` in
//! `skynet-gateway/src/app.rs`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use earl_assistant::{LaunchConfig, PermissionConfig, Registry};
use earl_core::{ChannelId, EarlConfig, PermissionMode, ThreadId};
use earl_heartbeat::{HeartbeatDefinition, HeartbeatEngine, HeartbeatHandle, RunnerContext};
use earl_mattermost::{MattermostClient, MattermostEventHandler, MattermostListener};
use earl_questions::Mediator;
use earl_sessions::Store;
use earl_streaming::StreamingResponse;
use earl_terminal::{Monitor, Tmux};
use figment::providers::{Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::session_directory::GatewaySessionDirectory;
use crate::{pipeline, reaper};
use earl_commands::CommandExecutor;
use earl_queue::Queue;

const ASSISTANT_COMMAND: &str = "claude";
const IDLE_THRESHOLD_SECS: i64 = 2 * 60 * 60;
const IDLE_REAPER_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug, Deserialize, Default)]
struct HeartbeatsFile {
    #[serde(default)]
    heartbeats: Vec<HeartbeatDefinition>,
}

fn load_heartbeat_definitions(config_root: &str) -> Vec<HeartbeatDefinition> {
    let path = PathBuf::from(config_root).join("heartbeats.toml");
    if !path.exists() {
        return Vec::new();
    }
    Figment::new()
        .merge(Toml::file(&path))
        .extract::<HeartbeatsFile>()
        .map(|f| f.heartbeats)
        .unwrap_or_else(|e| {
            warn!(error = %e, path = %path.display(), "failed to load heartbeats.toml, ignoring");
            Vec::new()
        })
}

/// All shared state, wired once at startup and handed to every background
/// task as an `Arc` clone.
pub struct Runner {
    pub(crate) config: EarlConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) queue: Arc<Queue>,
    pub(crate) mediator: Arc<Mediator<MattermostClient>>,
    pub(crate) commands: Arc<CommandExecutor<GatewaySessionDirectory>>,
    pub(crate) heartbeat: Option<HeartbeatHandle>,
    pub(crate) monitor: Arc<Monitor<MattermostClient, Tmux>>,
    pub(crate) mattermost: Arc<MattermostClient>,
    listener: Arc<MattermostListener>,

    pub(crate) streams: DashMap<ThreadId, Arc<StreamingResponse<MattermostClient>>>,
    pub(crate) tool_use_threads: DashMap<String, ThreadId>,
    pub(crate) analysis_followup_sent: DashMap<ThreadId, ()>,

    pub(crate) assistant_command: String,
    pub(crate) mcp_config_dir: PathBuf,
    pub(crate) interactive_permission_config: Option<PermissionConfig>,

    pub(crate) shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) pending_restart: AtomicBool,
    pub(crate) pending_update: AtomicBool,
}

impl Runner {
    pub async fn new(config: EarlConfig) -> anyhow::Result<Self> {
        let config_root = PathBuf::from(&config.config_root);
        std::fs::create_dir_all(&config_root)?;

        let store = Store::new(config_root.join("sessions.json"));
        let registry = Arc::new(Registry::new(store));

        let mcp_config_dir = config_root.join("mcp");
        std::fs::create_dir_all(&mcp_config_dir)?;

        let mattermost = Arc::new(MattermostClient::new(
            config.mattermost_url.clone(),
            config.mattermost_bot_token.clone(),
            config.mattermost_bot_id.clone(),
        ));

        let mediator = Arc::new(Mediator::new((*mattermost).clone()));
        let commands = Arc::new(CommandExecutor::new(GatewaySessionDirectory::new(Arc::clone(&registry))));
        let monitor = Arc::new(Monitor::new(Arc::clone(&mattermost), Arc::new(Tmux)));
        let listener = Arc::new(MattermostListener::new(config.mattermost_ws_url(), config.mattermost_bot_token.clone()));

        let interactive_permission_config = if config.skip_permissions {
            None
        } else {
            Some(PermissionConfig {
                mcp_binary: std::env::current_exe()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "earl-gateway".to_string()),
                user_servers_json: std::fs::read_to_string(config_root.join("mcp_servers.json")).ok(),
            })
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let definitions = load_heartbeat_definitions(&config.config_root);
        let heartbeat = if definitions.is_empty() {
            None
        } else {
            let ctx = RunnerContext {
                command: ASSISTANT_COMMAND.to_string(),
                mcp_config_dir: mcp_config_dir.clone(),
                interactive_permission_config: interactive_permission_config.clone(),
            };
            let (engine, handle) = HeartbeatEngine::new(definitions, Arc::clone(&registry), Arc::clone(&mattermost), ctx)?;
            tokio::spawn(engine.run(shutdown_rx.clone()));
            Some(handle)
        };

        let base_model = config.model.clone();
        let base_skip_permissions = config.skip_permissions;
        let base_permission_config = interactive_permission_config.clone();
        let base_mcp_config_dir = mcp_config_dir.clone();
        registry
            .resume_all(move |persisted| LaunchConfig {
                command: ASSISTANT_COMMAND.to_string(),
                working_dir: persisted.working_dir.clone(),
                channel_id: persisted.channel_id.clone(),
                model_override: base_model.clone(),
                skip_permissions: base_skip_permissions,
                permission_config: if base_skip_permissions { None } else { base_permission_config.clone() },
                durable_memory: None,
                mcp_config_dir: base_mcp_config_dir.clone(),
            })
            .await;

        Ok(Self {
            config,
            registry,
            queue: Arc::new(Queue::new()),
            mediator,
            commands,
            heartbeat,
            monitor,
            mattermost,
            listener,
            streams: DashMap::new(),
            tool_use_threads: DashMap::new(),
            analysis_followup_sent: DashMap::new(),
            assistant_command: ASSISTANT_COMMAND.to_string(),
            mcp_config_dir,
            interactive_permission_config,
            shutdown_tx,
            shutdown_rx,
            shutting_down: AtomicBool::new(false),
            pending_restart: AtomicBool::new(false),
            pending_update: AtomicBool::new(false),
        })
    }

    /// Drive every background subsystem until a shutdown signal fires.
    pub async fn run(self: Arc<Self>) {
        let monitor = Arc::clone(&self.monitor);
        let monitor_shutdown = self.shutdown_rx.clone();
        let poll_interval = std::time::Duration::from_secs(self.config.tmux_poll_interval_secs);
        tokio::spawn(async move { monitor.run(poll_interval, monitor_shutdown).await });

        tokio::spawn(reaper::run(Arc::clone(&self), self.shutdown_rx.clone()));

        info!("earl-gateway connected, listening for mattermost events");
        let handler: Arc<dyn MattermostEventHandler> = Arc::new(EventHandler(Arc::clone(&self)));
        self.listener.run(handler, self.shutdown_rx.clone()).await;
    }

    pub fn pending_restart(&self) -> bool {
        self.pending_restart.load(Ordering::SeqCst)
    }

    pub fn pending_update(&self) -> bool {
        self.pending_update.load(Ordering::SeqCst)
    }

    /// First call wins; later calls are no-ops. See [`crate::shutdown::initiate`].
    pub async fn initiate_shutdown(self: &Arc<Self>, restart: bool, update: bool) {
        crate::shutdown::initiate(self, restart, update).await;
    }

    pub fn working_dir_for(&self, channel_id: &ChannelId, thread_id: &ThreadId) -> String {
        self.commands
            .working_dir_override(thread_id)
            .unwrap_or_else(|| self.config.working_dir_for(channel_id.as_str()))
    }

    pub fn permission_mode(&self) -> PermissionMode {
        if self.config.skip_permissions {
            PermissionMode::Auto
        } else {
            PermissionMode::Interactive
        }
    }
}

pub fn install_signal_handlers(runner: Arc<Runner>) {
    let ctrl_c_runner = Arc::clone(&runner);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            ctrl_c_runner.initiate_shutdown(false, false).await;
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
                return;
            };
            if term.recv().await.is_some() {
                info!("received sigterm, shutting down");
                runner.initiate_shutdown(false, false).await;
            }
        });
    }
}

/// Adapts [`MattermostEventHandler`]'s `&self` callbacks to the `Arc<Runner>`
/// the pipeline free functions need, by spawning a short task per event.
struct EventHandler(Arc<Runner>);

#[async_trait]
impl MattermostEventHandler for EventHandler {
    async fn on_message(&self, post: earl_mattermost::InboundPost) {
        let runner = Arc::clone(&self.0);
        tokio::spawn(async move { pipeline::handle_incoming_message(runner, post).await });
    }

    async fn on_reaction(&self, reaction: earl_mattermost::InboundReaction) {
        let runner = Arc::clone(&self.0);
        tokio::spawn(async move { pipeline::handle_reaction(runner, reaction).await });
    }
}

pub const IDLE_THRESHOLD: i64 = IDLE_THRESHOLD_SECS;
pub const IDLE_REAPER_INTERVAL: u64 = IDLE_REAPER_INTERVAL_SECS;

#[cfg(test)]
pub(crate) fn test_config(config_root: &std::path::Path) -> EarlConfig {
    EarlConfig {
        mattermost_url: "https://chat.example.com".into(),
        mattermost_bot_token: "token".into(),
        mattermost_bot_id: "bot".into(),
        channels: vec![earl_core::config::ChannelBinding {
            channel_id: "chan-1".into(),
            working_dir: "/tmp".into(),
        }],
        allowed_users: vec![],
        skip_permissions: true,
        model: None,
        claude_home: None,
        tmux_poll_interval_secs: 5,
        config_root: config_root.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_heartbeat_definitions_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_heartbeat_definitions(dir.path().to_str().unwrap()).is_empty());
    }

    #[test]
    fn load_heartbeat_definitions_malformed_file_is_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("heartbeats.toml"), "not valid toml = [").unwrap();
        assert!(load_heartbeat_definitions(dir.path().to_str().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn new_runner_starts_with_no_pending_shutdown() {
        let dir = tempdir().unwrap();
        let runner = Runner::new(test_config(dir.path())).await.unwrap();
        assert!(!runner.pending_restart());
        assert!(!runner.pending_update());
        assert!(runner.heartbeat.is_none());
    }
}
