use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use earl_protocol::events::{AssistantEvent, ToolResultRefs, ToolUse};
use earl_protocol::McpConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::stats::Stats;

/// Whether a fresh session was started, or an existing one resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Fresh,
    Resume,
}

/// Presence of a permission-prompt MCP server (§6.1). `None` means the
/// session is launched with `--dangerously-skip-permissions` and no
/// permission config file at all.
#[derive(Debug, Clone)]
pub struct PermissionConfig {
    pub mcp_binary: String,
    pub user_servers_json: Option<String>,
}

/// Launch-time parameters for [`Session::start`].
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub command: String,
    pub working_dir: String,
    pub channel_id: String,
    pub model_override: Option<String>,
    pub skip_permissions: bool,
    pub permission_config: Option<PermissionConfig>,
    pub durable_memory: Option<String>,
    pub mcp_config_dir: PathBuf,
}

type TextCb = Box<dyn Fn(&str) + Send + Sync>;
type ToolUseCb = Box<dyn Fn(&ToolUse) + Send + Sync>;
type ToolResultCb = Box<dyn Fn(&ToolResultRefs) + Send + Sync>;
type CompleteCb = Box<dyn Fn(Stats) + Send + Sync>;
type SystemCb = Box<dyn Fn(Option<&str>, &serde_json::Value) + Send + Sync>;

/// At most one handler per event kind — registering again replaces the
/// previous handler (last-writer-wins, per spec).
#[derive(Default)]
struct Callbacks {
    on_text: Option<TextCb>,
    on_tool_use: Option<ToolUseCb>,
    on_tool_result: Option<ToolResultCb>,
    on_complete: Option<CompleteCb>,
    on_system: Option<SystemCb>,
}

/// Owns one assistant subprocess for the lifetime of a thread's conversation.
///
/// Exactly one process per live `Session`; once `alive()` goes false it never
/// returns true — the registry must create a replacement. `send_turn` is a
/// no-op returning `false` when not alive.
pub struct Session {
    pub claude_session_id: String,
    pub thread_id: String,
    pub channel_id: String,
    pub working_dir: String,
    pub mode: SessionMode,
    pub model_override: Option<String>,

    child: AsyncMutex<Option<Child>>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    reader_handles: AsyncMutex<Vec<JoinHandle<()>>>,
    callbacks: Arc<std::sync::Mutex<Callbacks>>,
    stats: Arc<std::sync::Mutex<Stats>>,
    alive: AtomicBool,
    mcp_config_path: Option<PathBuf>,
}

impl Session {
    /// Spawn the assistant as a child process and begin reading its stdout
    /// and stderr streams on background tasks.
    pub async fn start(cfg: LaunchConfig, mode: SessionMode, resume_id: Option<String>) -> Result<Self> {
        let claude_session_id = resume_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mcp_config_path = if cfg.permission_config.is_some() {
            Some(cfg.mcp_config_dir.join(format!("earl-mcp-{}.json", claude_session_id)))
        } else {
            None
        };

        if let (Some(path), Some(perm)) = (&mcp_config_path, &cfg.permission_config) {
            let mut config = match &perm.user_servers_json {
                Some(raw) => McpConfig::from_user_servers_json(raw),
                None => McpConfig::default(),
            };
            config = config.with_permission_prompt(&perm.mcp_binary);
            config
                .write_to(path)
                .map_err(SessionError::McpConfig)?;
        }

        let args = build_args(&cfg, mode, &claude_session_id, mcp_config_path.as_deref());

        debug!(command = %cfg.command, ?args, "spawning assistant subprocess");

        let mut command = tokio::process::Command::new(&cfg.command);
        command
            .args(&args)
            .current_dir(&cfg.working_dir)
            // Inherited by any MCP server the assistant itself spawns, so the
            // permission-prompt server knows which channel to post into.
            .env("EARL_CHANNEL_ID", &cfg.channel_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(SessionError::Spawn)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let callbacks = Arc::new(std::sync::Mutex::new(Callbacks::default()));
        let stats = Arc::new(std::sync::Mutex::new(Stats::default()));

        let mut reader_handles = Vec::new();
        if let Some(stdout) = stdout {
            let cb = Arc::clone(&callbacks);
            let stats_handle = Arc::clone(&stats);
            reader_handles.push(tokio::spawn(read_stdout_loop(stdout, cb, stats_handle)));
        }
        if let Some(stderr) = stderr {
            reader_handles.push(tokio::spawn(read_stderr_loop(stderr)));
        }

        Ok(Self {
            claude_session_id,
            thread_id: String::new(),
            channel_id: cfg.channel_id,
            working_dir: cfg.working_dir,
            mode,
            model_override: cfg.model_override,
            child: AsyncMutex::new(Some(child)),
            stdin: AsyncMutex::new(stdin),
            reader_handles: AsyncMutex::new(reader_handles),
            callbacks,
            stats,
            alive: AtomicBool::new(true),
            mcp_config_path,
        })
    }

    pub fn on_text(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_text = Some(Box::new(f));
    }

    pub fn on_tool_use(&self, f: impl Fn(&ToolUse) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_tool_use = Some(Box::new(f));
    }

    pub fn on_tool_result(&self, f: impl Fn(&ToolResultRefs) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_tool_result = Some(Box::new(f));
    }

    pub fn on_complete(&self, f: impl Fn(Stats) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_complete = Some(Box::new(f));
    }

    pub fn on_system(&self, f: impl Fn(Option<&str>, &serde_json::Value) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_system = Some(Box::new(f));
    }

    /// `process is running AND stdin is open`.
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Serialize the turn object and write it, newline-terminated, to stdin.
    /// Resets per-turn stats and stamps `message_sent_at` only on success.
    /// Returns `false` on any I/O failure or when not alive — the caller
    /// must not reset its own bookkeeping on `false`.
    pub async fn send_turn(&self, text: &str) -> bool {
        if !self.alive() {
            return false;
        }

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            self.alive.store(false, Ordering::SeqCst);
            return false;
        };

        let line = earl_protocol::turn_frame(text);
        let write_result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        match write_result {
            Ok(()) => {
                let mut stats = self.stats.lock().unwrap();
                stats.reset_turn();
                stats.message_sent_at = Some(Utc::now());
                true
            }
            Err(e) => {
                warn!(error = %e, thread_id = %self.thread_id, "stdin write failed, marking session dead");
                self.alive.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Multi-step termination: polite interrupt, brief wait, terminate,
    /// brief wait, force-kill as a last resort. Safe to call on an already
    /// dead session. Joins both reader tasks.
    pub async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);

        // Drop stdin first so the reader tasks see EOF promptly if the
        // process happens to exit cleanly on its own.
        self.stdin.lock().await.take();

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            interrupt(child);
            if wait_for_exit(child, std::time::Duration::from_millis(500))
                .await
                .is_none()
            {
                terminate(child);
                if wait_for_exit(child, std::time::Duration::from_millis(500))
                    .await
                    .is_none()
                {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        *child_guard = None;

        let mut handles = self.reader_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        if let Some(path) = &self.mcp_config_path {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn stats_snapshot(&self) -> Stats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &mut Child) {}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

async fn wait_for_exit(child: &mut Child, duration: std::time::Duration) -> Option<()> {
    tokio::time::timeout(duration, child.wait()).await.ok().map(|_| ())
}

async fn read_stdout_loop(
    stdout: tokio::process::ChildStdout,
    callbacks: Arc<std::sync::Mutex<Callbacks>>,
    stats: Arc<std::sync::Mutex<Stats>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let cb = callbacks.lock().unwrap();
                let mut stats = stats.lock().unwrap();
                dispatch_line(&line, &cb, &mut stats);
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "error reading assistant stdout");
                break;
            }
        }
    }
}

async fn read_stderr_loop(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stderr = %line, "assistant stderr");
    }
}

/// Dispatch one parsed event to the registered callbacks, exactly per the
/// §4.1 event table, updating `stats` along the way. Exposed standalone so
/// it can be exercised with canned JSONL without a real subprocess.
fn dispatch_line(line: &str, callbacks: &Callbacks, stats: &mut Stats) {
    let Some(event) = earl_protocol::parse_line(line) else {
        return;
    };

    match event {
        AssistantEvent::System { subtype, message } => {
            if !message.is_null() {
                if let Some(cb) = &callbacks.on_system {
                    cb(subtype.as_deref(), &message);
                }
            }
        }
        AssistantEvent::Assistant { text, tool_uses } => {
            if stats.first_token_at.is_none() {
                stats.first_token_at = Some(Utc::now());
            }
            if let Some(text) = text {
                if let Some(cb) = &callbacks.on_text {
                    cb(&text);
                }
            }
            for tool_use in &tool_uses {
                if let Some(cb) = &callbacks.on_tool_use {
                    cb(tool_use);
                }
            }
        }
        AssistantEvent::User { tool_result } => {
            if let Some(refs) = tool_result {
                if let Some(cb) = &callbacks.on_tool_result {
                    cb(&refs);
                }
            }
        }
        AssistantEvent::Result {
            total_cost_usd,
            usage,
            model_usage,
        } => {
            if let Some(cost) = total_cost_usd {
                stats.lifetime_cost += cost;
            }
            if let Some(usage) = &usage {
                stats.turn_input_tokens = usage.input_tokens;
                stats.turn_output_tokens = usage.output_tokens;
                stats.turn_cache_read_tokens = usage.cache_read_input_tokens;
                stats.turn_cache_creation_tokens = usage.cache_creation_input_tokens;
                stats.lifetime_input_tokens += usage.input_tokens;
                stats.lifetime_output_tokens += usage.output_tokens;
            }
            if let Some(model_usage) = &model_usage {
                stats.model_id = Some(model_usage.model_id.clone());
                stats.context_window = model_usage.context_window;
            }
            stats.complete_at = Some(Utc::now());
            if let Some(cb) = &callbacks.on_complete {
                cb(stats.clone());
            }
        }
        AssistantEvent::Unknown(_) => {}
    }
}

fn build_args(
    cfg: &LaunchConfig,
    mode: SessionMode,
    session_id: &str,
    mcp_config_path: Option<&std::path::Path>,
) -> Vec<String> {
    let mut args = vec![
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    match mode {
        SessionMode::Fresh => {
            args.push("--session-id".to_string());
            args.push(session_id.to_string());
        }
        SessionMode::Resume => {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
    }

    if let Some(model) = &cfg.model_override {
        args.push("--model".to_string());
        args.push(model.clone());
    }

    match mcp_config_path {
        None => args.push("--dangerously-skip-permissions".to_string()),
        Some(path) => {
            if cfg.skip_permissions {
                args.push("--dangerously-skip-permissions".to_string());
            }
            args.push("--permission-prompt-tool".to_string());
            args.push(earl_protocol::mcp::PERMISSION_PROMPT_SERVER_NAME.to_string());
            args.push("--mcp-config".to_string());
            args.push(path.display().to_string());
        }
    }

    if let Some(memory) = &cfg.durable_memory {
        args.push("--append-system-prompt".to_string());
        args.push(memory.clone());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn no_permission_config_uses_skip_permissions_only() {
        let cfg = LaunchConfig {
            command: "claude".into(),
            working_dir: "/tmp".into(),
            channel_id: "c1".into(),
            model_override: None,
            skip_permissions: false,
            permission_config: None,
            durable_memory: None,
            mcp_config_dir: PathBuf::from("/tmp"),
        };
        let args = build_args(&cfg, SessionMode::Fresh, "sid", None);
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--permission-prompt-tool".to_string()));
    }

    #[test]
    fn permission_config_uses_prompt_tool_only() {
        let cfg = LaunchConfig {
            command: "claude".into(),
            working_dir: "/tmp".into(),
            channel_id: "c1".into(),
            model_override: None,
            skip_permissions: false,
            permission_config: Some(PermissionConfig {
                mcp_binary: "/bin/earl-mcp".into(),
                user_servers_json: None,
            }),
            durable_memory: None,
            mcp_config_dir: PathBuf::from("/tmp"),
        };
        let path = PathBuf::from("/tmp/earl-mcp-sid.json");
        let args = build_args(&cfg, SessionMode::Fresh, "sid", Some(&path));
        assert!(args.contains(&"--permission-prompt-tool".to_string()));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[test]
    fn skip_permissions_and_mcp_config_sets_both_flags() {
        let cfg = LaunchConfig {
            command: "claude".into(),
            working_dir: "/tmp".into(),
            channel_id: "c1".into(),
            model_override: None,
            skip_permissions: true,
            permission_config: Some(PermissionConfig {
                mcp_binary: "/bin/earl-mcp".into(),
                user_servers_json: None,
            }),
            durable_memory: None,
            mcp_config_dir: PathBuf::from("/tmp"),
        };
        let path = PathBuf::from("/tmp/earl-mcp-sid.json");
        let args = build_args(&cfg, SessionMode::Fresh, "sid", Some(&path));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(args.contains(&"--permission-prompt-tool".to_string()));
    }

    #[test]
    fn resume_mode_passes_resume_flag() {
        let cfg = LaunchConfig {
            command: "claude".into(),
            working_dir: "/tmp".into(),
            channel_id: "c1".into(),
            model_override: None,
            skip_permissions: false,
            permission_config: None,
            durable_memory: None,
            mcp_config_dir: PathBuf::from("/tmp"),
        };
        let args = build_args(&cfg, SessionMode::Resume, "old-sid", None);
        assert!(args.contains(&"--resume".to_string()));
        assert!(args.contains(&"old-sid".to_string()));
    }

    #[test]
    fn dispatch_assistant_text_invokes_on_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let mut callbacks = Callbacks::default();
        callbacks.on_text = Some(Box::new(move |text: &str| {
            assert_eq!(text, "hello");
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        let mut stats = Stats::default();
        dispatch_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#,
            &callbacks,
            &mut stats,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stats.first_token_at.is_some());
    }

    #[test]
    fn dispatch_malformed_line_invokes_nothing() {
        let mut callbacks = Callbacks::default();
        callbacks.on_text = Some(Box::new(|_: &str| panic!("should not be called")));
        let mut stats = Stats::default();
        dispatch_line("not json", &callbacks, &mut stats);
    }

    #[test]
    fn dispatch_result_invokes_on_complete_and_updates_stats() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let mut callbacks = Callbacks::default();
        callbacks.on_complete = Some(Box::new(move |_stats| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        let mut stats = Stats::default();
        dispatch_line(
            r#"{"type":"result","total_cost_usd":0.01,"usage":{"input_tokens":5,"output_tokens":7}}"#,
            &callbacks,
            &mut stats,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.lifetime_cost, 0.01);
        assert_eq!(stats.turn_input_tokens, 5);
        assert_eq!(stats.lifetime_input_tokens, 5);
        assert!(stats.complete_at.is_some());
    }
}
