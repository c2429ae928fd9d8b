//! Idle-session reaper (§4.10): stops sessions nobody has used in a while
//! so a forgotten thread doesn't keep an assistant process running forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use earl_core::{ChannelId, ThreadId};
use earl_streaming::ChatPoster;
use tokio::sync::watch;
use tracing::info;

use crate::runner::{Runner, IDLE_REAPER_INTERVAL, IDLE_THRESHOLD};

pub async fn run(runner: Arc<Runner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(IDLE_REAPER_INTERVAL));
    loop {
        tokio::select! {
            _ = interval.tick() => sweep(&runner).await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn sweep(runner: &Arc<Runner>) {
    let now = Utc::now();
    for persisted in runner.registry.persisted_sessions() {
        if persisted.is_paused {
            continue;
        }
        let Ok(last_activity) = chrono::DateTime::parse_from_rfc3339(&persisted.last_activity_at) else {
            continue;
        };
        let idle_secs = (now - last_activity.with_timezone(&Utc)).num_seconds();
        if idle_secs < IDLE_THRESHOLD {
            continue;
        }

        info!(thread_id = %persisted.thread_id, idle_secs, "reaping idle session");
        let thread_id = ThreadId::from(persisted.thread_id.clone());
        let channel_id = ChannelId::from(persisted.channel_id.clone());
        runner.registry.stop_session(thread_id.as_str()).await;
        runner
            .mattermost
            .create_post(
                &channel_id,
                &thread_id,
                "Stopping this session after a period of inactivity. Send a message to start a new one.",
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{test_config, Runner};
    use earl_sessions::{PersistedSession, Store};
    use tempfile::tempdir;

    fn persisted(thread_id: &str, last_activity_at: String) -> PersistedSession {
        let mut record = PersistedSession::new(
            "claude-session".to_string(),
            thread_id.to_string(),
            "chan-1".to_string(),
            "/tmp".to_string(),
        );
        record.last_activity_at = last_activity_at;
        record
    }

    #[tokio::test]
    async fn sweep_reaps_only_idle_sessions() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(Runner::new(test_config(dir.path())).await.unwrap());

        let store = Store::new(dir.path().join("sessions.json"));
        let stale_at = (Utc::now() - chrono::Duration::seconds(IDLE_THRESHOLD + 60)).to_rfc3339();
        store.upsert(persisted("idle-thread", stale_at)).unwrap();
        store.upsert(persisted("fresh-thread", Utc::now().to_rfc3339())).unwrap();

        sweep(&runner).await;

        let remaining: Vec<String> = runner
            .registry
            .persisted_sessions()
            .into_iter()
            .map(|p| p.thread_id)
            .collect();
        assert_eq!(remaining, vec!["fresh-thread".to_string()]);
    }

    #[tokio::test]
    async fn sweep_skips_paused_sessions() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(Runner::new(test_config(dir.path())).await.unwrap());

        let store = Store::new(dir.path().join("sessions.json"));
        let stale_at = (Utc::now() - chrono::Duration::seconds(IDLE_THRESHOLD + 60)).to_rfc3339();
        let mut record = persisted("paused-thread", stale_at);
        record.is_paused = true;
        store.upsert(record).unwrap();

        sweep(&runner).await;

        assert_eq!(runner.registry.persisted_sessions().len(), 1);
    }
}
