use async_trait::async_trait;
use dashmap::DashMap;
use earl_core::ThreadId;

use crate::command::Command;

/// What running a [`Command`] told the caller to do next. Mirrors the
/// "nil | passthrough" shape, widened with the outcomes the other commands
/// need (the orchestrator still owns process restart/update and active
/// `StreamingResponse` lifetime, so those are signaled back rather than
/// performed here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Forward this text through the queue pipeline as if the user had
    /// sent it (`!escape`).
    Passthrough(String),
    /// Post this text back into the thread; nothing else to do.
    Reply(String),
    /// The session for this thread was torn down; the caller must also
    /// abort any in-flight `StreamingResponse` for it.
    SessionStopped,
    /// The caller should restart the process.
    RestartRequested,
    /// The caller should update and then restart the process.
    UpdateRequested,
}

/// The slice of the session registry the Command Executor needs. Kept
/// narrow so `!status`/`!stop` can be tested without spinning a real
/// assistant subprocess.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// One summary line per active/persisted session, for `!status`.
    async fn status_lines(&self) -> Vec<String>;

    /// Tear down the live session for `thread_id`, if any. Returns `true`
    /// if a session was actually stopped.
    async fn stop(&self, thread_id: &ThreadId) -> bool;
}

/// Parses and runs `!`-commands. Owns the per-thread working-directory
/// override table; everything else it delegates to a [`SessionDirectory`].
pub struct CommandExecutor<D: SessionDirectory> {
    directory: D,
    cwd_overrides: DashMap<ThreadId, String>,
}

impl<D: SessionDirectory> CommandExecutor<D> {
    pub fn new(directory: D) -> Self {
        Self {
            directory,
            cwd_overrides: DashMap::new(),
        }
    }

    /// The working-directory override recorded for this thread via
    /// `!cwd`, if any.
    pub fn working_dir_override(&self, thread_id: &ThreadId) -> Option<String> {
        self.cwd_overrides.get(thread_id).map(|v| v.clone())
    }

    pub async fn execute(&self, command: &Command, thread_id: &ThreadId) -> Option<ExecutionOutcome> {
        match command {
            Command::Help => Some(ExecutionOutcome::Reply(help_text())),

            Command::Status => {
                let lines = self.directory.status_lines().await;
                let body = if lines.is_empty() {
                    "No active or persisted sessions.".to_string()
                } else {
                    lines.join("\n")
                };
                Some(ExecutionOutcome::Reply(body))
            }

            Command::Stop => {
                self.directory.stop(thread_id).await;
                Some(ExecutionOutcome::SessionStopped)
            }

            Command::Cwd(path) => {
                if path.is_empty() {
                    self.cwd_overrides.remove(thread_id);
                    Some(ExecutionOutcome::Reply(
                        "Working directory override cleared.".to_string(),
                    ))
                } else {
                    self.cwd_overrides.insert(thread_id.clone(), path.clone());
                    Some(ExecutionOutcome::Reply(format!(
                        "Working directory for this thread set to `{path}`."
                    )))
                }
            }

            Command::Restart => Some(ExecutionOutcome::RestartRequested),

            Command::Update => Some(ExecutionOutcome::UpdateRequested),

            Command::Escape(text) => Some(ExecutionOutcome::Passthrough(text.clone())),
        }
    }
}

fn help_text() -> String {
    "**earl commands**\n\
     - `!help` — show this help\n\
     - `!status` / `!sessions` — list active and persisted sessions\n\
     - `!stop` / `!kill` — terminate this thread's session\n\
     - `!cwd <path>` — override the working directory for this thread (`!cwd` clears it)\n\
     - `!restart` — restart the bot process\n\
     - `!update` — update and restart the bot process\n\
     - `!escape <text>` — send `<text>` verbatim, even if it starts with `!`"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDirectory {
        lines: Vec<String>,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl SessionDirectory for FakeDirectory {
        async fn status_lines(&self) -> Vec<String> {
            self.lines.clone()
        }

        async fn stop(&self, _thread_id: &ThreadId) -> bool {
            self.stopped.store(true, Ordering::SeqCst);
            true
        }
    }

    fn directory(lines: Vec<String>) -> FakeDirectory {
        FakeDirectory {
            lines,
            stopped: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn help_replies_with_usage() {
        let executor = CommandExecutor::new(directory(vec![]));
        let outcome = executor
            .execute(&Command::Help, &ThreadId::from("t"))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Reply(body) if body.contains("!help")));
    }

    #[tokio::test]
    async fn status_with_no_sessions_says_so() {
        let executor = CommandExecutor::new(directory(vec![]));
        let outcome = executor
            .execute(&Command::Status, &ThreadId::from("t"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Reply("No active or persisted sessions.".to_string())
        );
    }

    #[tokio::test]
    async fn status_joins_directory_lines() {
        let executor = CommandExecutor::new(directory(vec!["a: running".to_string(), "b: idle".to_string()]));
        let outcome = executor
            .execute(&Command::Status, &ThreadId::from("t"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Reply("a: running\nb: idle".to_string())
        );
    }

    #[tokio::test]
    async fn stop_tears_down_the_session_and_signals_caller() {
        let fake = directory(vec![]);
        let executor = CommandExecutor::new(fake);
        let outcome = executor
            .execute(&Command::Stop, &ThreadId::from("t"))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::SessionStopped);
        assert!(executor.directory.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cwd_sets_and_clears_override() {
        let executor = CommandExecutor::new(directory(vec![]));
        let thread_id = ThreadId::from("t");

        executor
            .execute(&Command::Cwd("/tmp/work".to_string()), &thread_id)
            .await;
        assert_eq!(
            executor.working_dir_override(&thread_id),
            Some("/tmp/work".to_string())
        );

        executor
            .execute(&Command::Cwd(String::new()), &thread_id)
            .await;
        assert_eq!(executor.working_dir_override(&thread_id), None);
    }

    #[tokio::test]
    async fn restart_and_update_signal_the_caller() {
        let executor = CommandExecutor::new(directory(vec![]));
        let thread_id = ThreadId::from("t");

        assert_eq!(
            executor.execute(&Command::Restart, &thread_id).await,
            Some(ExecutionOutcome::RestartRequested)
        );
        assert_eq!(
            executor.execute(&Command::Update, &thread_id).await,
            Some(ExecutionOutcome::UpdateRequested)
        );
    }

    #[tokio::test]
    async fn escape_passes_the_text_through() {
        let executor = CommandExecutor::new(directory(vec![]));
        let outcome = executor
            .execute(&Command::Escape("!not-a-command".to_string()), &ThreadId::from("t"))
            .await;
        assert_eq!(
            outcome,
            Some(ExecutionOutcome::Passthrough("!not-a-command".to_string()))
        );
    }
}
