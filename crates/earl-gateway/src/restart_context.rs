//! Carries which channel/thread/command triggered a restart or update
//! across the process replacement (§4.11), so the new process can post a
//! one-line confirmation into the thread that asked for it.

use std::path::PathBuf;

use earl_core::{ChannelId, ThreadId};
use earl_streaming::ChatPoster;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::runner::Runner;

#[derive(Debug, Serialize, Deserialize)]
struct RestartContext {
    channel_id: String,
    thread_id: String,
    command: String,
}

fn context_path(config_root: &str) -> PathBuf {
    PathBuf::from(config_root).join("restart_context.json")
}

/// Record the originating thread just before a restart/update is kicked
/// off. `command` is `"restart"` or `"update"`.
pub fn write_pending(config_root: &str, channel_id: &ChannelId, thread_id: &ThreadId, command: &str) {
    let ctx = RestartContext {
        channel_id: channel_id.as_str().to_string(),
        thread_id: thread_id.as_str().to_string(),
        command: command.to_string(),
    };
    let Ok(body) = serde_json::to_string(&ctx) else {
        return;
    };
    if let Err(e) = std::fs::write(context_path(config_root), body) {
        warn!(error = %e, "failed to write restart context");
    }
}

/// On startup, if a restart/update left a marker behind, post a one-line
/// "I'm back" notice into the thread that triggered it and clear the
/// marker so a crash loop doesn't keep re-posting it.
pub async fn notify_if_pending(runner: &Runner) {
    let path = context_path(&runner.config.config_root);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return;
    };
    let _ = std::fs::remove_file(&path);

    let Ok(ctx) = serde_json::from_str::<RestartContext>(&raw) else {
        return;
    };
    let channel_id = ChannelId::from(ctx.channel_id);
    let thread_id = ThreadId::from(ctx.thread_id);
    let verb = if ctx.command == "update" { "updated and restarted" } else { "restarted" };
    runner
        .mattermost
        .create_post(&channel_id, &thread_id, &format!("Back up after being {verb}."))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_pending_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let config_root = dir.path().to_str().unwrap();
        let channel_id = ChannelId::from("chan-1".to_string());
        let thread_id = ThreadId::from("thread-1".to_string());

        write_pending(config_root, &channel_id, &thread_id, "restart");

        let raw = std::fs::read_to_string(context_path(config_root)).unwrap();
        let ctx: RestartContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(ctx.channel_id, "chan-1");
        assert_eq!(ctx.thread_id, "thread-1");
        assert_eq!(ctx.command, "restart");
    }

    #[test]
    fn context_path_lives_under_config_root() {
        assert_eq!(context_path("/tmp/earl"), PathBuf::from("/tmp/earl/restart_context.json"));
    }
}
