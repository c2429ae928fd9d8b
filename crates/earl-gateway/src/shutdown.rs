//! Shutdown/restart/update coordination (§4.11).
//!
//! Every background loop (heartbeat engine, terminal monitor, idle reaper,
//! Mattermost listener) already watches its own `watch::Receiver<bool>`
//! handed to it at spawn time, all cloned from the same sender — so this
//! module only needs to flip the pending flags, best-effort pause every
//! live session, and fire that one sender. Nothing here holds a direct
//! handle to any of those loops.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::runner::Runner;

/// First caller wins; later calls are no-ops, so a `!restart` racing a
/// `!update` (or a ctrl-c during either) can't double-fire the teardown.
pub async fn initiate(runner: &Arc<Runner>, restart: bool, update: bool) {
    if runner.shutting_down.swap(true, Ordering::SeqCst) {
        return;
    }
    if restart {
        runner.pending_restart.store(true, Ordering::SeqCst);
    }
    if update {
        runner.pending_update.store(true, Ordering::SeqCst);
    }

    info!(restart, update, "shutdown initiated");

    let registry = Arc::clone(&runner.registry);
    let shutdown_tx = runner.shutdown_tx.clone();
    tokio::spawn(async move {
        registry.pause_all().await;
        let _ = shutdown_tx.send(true);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{test_config, Runner};
    use tempfile::tempdir;

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(Runner::new(test_config(dir.path())).await.unwrap());

        initiate(&runner, true, false).await;
        assert!(runner.pending_restart());
        assert!(!runner.pending_update());

        initiate(&runner, false, true).await;
        assert!(!runner.pending_update(), "a later call must not flip flags once shutdown already started");
    }
}
