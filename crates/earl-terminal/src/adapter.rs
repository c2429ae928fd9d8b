//! Narrow seam onto the `tmux` CLI — the only thing the monitor needs from
//! whatever terminal multiplexer actually owns the panes.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait TmuxAdapter: Send + Sync {
    async fn session_exists(&self, name: &str) -> bool;
    async fn capture_pane(&self, name: &str) -> Option<String>;
    async fn send_keys(&self, name: &str, keys: &str) -> bool;
}

/// Drives a real `tmux` binary on `$PATH`.
pub struct Tmux;

#[async_trait]
impl TmuxAdapter for Tmux {
    async fn session_exists(&self, name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn capture_pane(&self, name: &str) -> Option<String> {
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", name, "-p"])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            debug!(name, "tmux capture-pane failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_keys(&self, name: &str, keys: &str) -> bool {
        Command::new("tmux")
            .args(["send-keys", "-t", name, keys, "Enter"])
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
