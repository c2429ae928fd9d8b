//! Poll loop over registered panes (§4.9).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use earl_core::{ChannelId, ThreadId};
use earl_questions::ReactionPoster;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapter::TmuxAdapter;
use crate::classify::{classify, parse_question, PaneState, StallTracker, DEFAULT_STALL_THRESHOLD};
use crate::truncate::last_lines;
use crate::types::{PendingKind, PendingTerminalInteraction, TerminalSessionInfo};

const ERROR_ALERT_LINES: usize = 10;
const EMOJI_ORDER: [&str; 4] = ["one", "two", "three", "four"];
const ALLOW_EMOJI: &str = "white_check_mark";
const DENY_EMOJI: &str = "x";

struct SessionState {
    info: TerminalSessionInfo,
    stall: StallTracker,
    last_state: Option<PaneState>,
}

/// Owns the set of registered panes and drives the poll/classify/alert loop.
pub struct Monitor<P: ReactionPoster, A: TmuxAdapter> {
    poster: Arc<P>,
    adapter: Arc<A>,
    sessions: DashMap<String, SessionState>,
    pending: DashMap<String, PendingTerminalInteraction>,
    stall_threshold: u32,
}

impl<P: ReactionPoster, A: TmuxAdapter> Monitor<P, A> {
    pub fn new(poster: Arc<P>, adapter: Arc<A>) -> Self {
        Self {
            poster,
            adapter,
            sessions: DashMap::new(),
            pending: DashMap::new(),
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    pub fn register(&self, info: TerminalSessionInfo) {
        let name = info.name.clone();
        self.sessions.insert(
            name,
            SessionState { info, stall: StallTracker::new(), last_state: None },
        );
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Drive the poll loop until `shutdown` is signalled.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("terminal monitor started");
        let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("terminal monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn poll_once(&self) {
        let names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(e) = self.poll_one(&name).await {
                warn!(session = name, error = %e, "terminal monitor poll failed");
            }
        }
    }

    async fn poll_one(&self, name: &str) -> Result<(), String> {
        if !self.adapter.session_exists(name).await {
            self.tombstone(name).await;
            return Ok(());
        }

        let Some(capture) = self.adapter.capture_pane(name).await else {
            return Err("capture_pane returned nothing".to_string());
        };

        let (channel_id, thread_id_str, changed, new_state) = {
            let mut entry = self.sessions.get_mut(name).ok_or("session vanished mid-poll")?;
            let new_state = classify(&capture, &mut entry.stall, self.stall_threshold);
            let changed = entry.last_state != Some(new_state);
            entry.last_state = Some(new_state);
            (entry.info.channel_id.clone(), entry.info.thread_id.as_str().to_string(), changed, new_state)
        };

        if !changed {
            return Ok(());
        }

        let thread_id = ThreadId::from(thread_id_str);
        match new_state {
            PaneState::Completed => {
                self.poster
                    .create_post(&channel_id, &thread_id, &format!("\u{2705} `{name}` completed"))
                    .await;
            }
            PaneState::Errored => {
                let tail = last_lines(&capture, ERROR_ALERT_LINES);
                self.poster
                    .create_post(&channel_id, &thread_id, &format!("\u{274C} `{name}` errored\n```\n{tail}\n```"))
                    .await;
            }
            PaneState::Stalled => {
                self.poster
                    .create_post(&channel_id, &thread_id, &format!("\u{23F3} `{name}` appears stalled"))
                    .await;
            }
            PaneState::AskingQuestion => self.post_question(name, &channel_id, &thread_id, &capture).await,
            PaneState::RequestingPermission => self.post_permission(name, &channel_id, &thread_id).await,
            PaneState::Running => {}
        }

        Ok(())
    }

    async fn post_question(&self, name: &str, channel_id: &ChannelId, thread_id: &ThreadId, capture: &str) {
        if self.pending.iter().any(|e| e.session_name == name) {
            return;
        }
        let Some((question, options)) = parse_question(capture) else { return };

        let mut body = question;
        for (i, option) in options.iter().enumerate() {
            body.push_str(&format!("\n{}. {}", i + 1, option));
        }

        let Some(post_id) = self.poster.create_post(channel_id, thread_id, &body).await else { return };
        for i in 0..options.len().min(4) {
            let _ = self.poster.add_reaction(&post_id, EMOJI_ORDER[i]).await;
        }
        self.pending.insert(
            post_id,
            PendingTerminalInteraction { session_name: name.to_string(), kind: PendingKind::Question },
        );
    }

    async fn post_permission(&self, name: &str, channel_id: &ChannelId, thread_id: &ThreadId) {
        if self.pending.iter().any(|e| e.session_name == name) {
            return;
        }
        let body = format!("\u{1F512} `{name}` is requesting permission");
        let Some(post_id) = self.poster.create_post(channel_id, thread_id, &body).await else { return };
        let _ = self.poster.add_reaction(&post_id, ALLOW_EMOJI).await;
        let _ = self.poster.add_reaction(&post_id, DENY_EMOJI).await;
        self.pending.insert(
            post_id,
            PendingTerminalInteraction { session_name: name.to_string(), kind: PendingKind::Permission },
        );
    }

    async fn tombstone(&self, name: &str) {
        if self.sessions.remove(name).is_none() {
            return;
        }
        self.pending.retain(|_, p| p.session_name != name);
    }

    /// Handle a reaction on a pending question/permission post. Sends the
    /// corresponding keystrokes into the pane and clears the pending entry
    /// only on success, so a failed send can be retried.
    pub async fn handle_reaction(&self, post_id: &str, emoji_name: &str) -> Option<()> {
        let pending = self.pending.get(post_id)?.value().clone();

        let keys = match pending.kind {
            PendingKind::Question => {
                let index = EMOJI_ORDER.iter().position(|e| *e == emoji_name)?;
                (index + 1).to_string()
            }
            PendingKind::Permission => {
                if emoji_name == ALLOW_EMOJI {
                    "y".to_string()
                } else if emoji_name == DENY_EMOJI {
                    "n".to_string()
                } else {
                    return None;
                }
            }
        };

        if self.adapter.send_keys(&pending.session_name, &keys).await {
            self.pending.remove(post_id);
            Some(())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakePoster {
        posts: StdMutex<Vec<String>>,
        reactions: StdMutex<Vec<(String, String)>>,
        post_counter: AtomicUsize,
    }

    impl FakePoster {
        fn new() -> Self {
            Self { posts: StdMutex::new(Vec::new()), reactions: StdMutex::new(Vec::new()), post_counter: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ReactionPoster for FakePoster {
        async fn create_post(&self, _channel_id: &ChannelId, _thread_id: &ThreadId, text: &str) -> Option<String> {
            self.posts.lock().unwrap().push(text.to_string());
            Some(format!("post-{}", self.post_counter.fetch_add(1, Ordering::SeqCst)))
        }
        async fn delete_post(&self, _post_id: &str) -> bool {
            true
        }
        async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> bool {
            self.reactions.lock().unwrap().push((post_id.to_string(), emoji_name.to_string()));
            true
        }
    }

    struct FakeAdapter {
        exists: bool,
        capture: StdMutex<String>,
        sent_keys: StdMutex<Vec<(String, String)>>,
    }

    impl FakeAdapter {
        fn new(capture: &str) -> Self {
            Self { exists: true, capture: StdMutex::new(capture.to_string()), sent_keys: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl TmuxAdapter for FakeAdapter {
        async fn session_exists(&self, _name: &str) -> bool {
            self.exists
        }
        async fn capture_pane(&self, _name: &str) -> Option<String> {
            Some(self.capture.lock().unwrap().clone())
        }
        async fn send_keys(&self, name: &str, keys: &str) -> bool {
            self.sent_keys.lock().unwrap().push((name.to_string(), keys.to_string()));
            true
        }
    }

    fn session(name: &str) -> TerminalSessionInfo {
        TerminalSessionInfo {
            name: name.to_string(),
            channel_id: ChannelId::from("chan"),
            thread_id: ThreadId::from("thread"),
            working_dir: "/tmp".to_string(),
            prompt: "run the tests".to_string(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn missing_session_is_tombstoned_and_removed() {
        let poster = Arc::new(FakePoster::new());
        let adapter = Arc::new(FakeAdapter { exists: false, ..FakeAdapter::new("") });
        let monitor = Monitor::new(poster, adapter);
        monitor.register(session("s1"));

        monitor.poll_once().await;

        assert!(!monitor.is_registered("s1"));
    }

    #[tokio::test]
    async fn completed_pane_posts_an_alert_once() {
        let poster = Arc::new(FakePoster::new());
        let adapter = Arc::new(FakeAdapter::new("done\n$ "));
        let monitor = Monitor::new(poster.clone(), adapter);
        monitor.register(session("s1"));

        monitor.poll_once().await;
        monitor.poll_once().await;

        let posts = poster.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].contains("completed"));
    }

    #[tokio::test]
    async fn question_pane_posts_with_reactions_and_routes_back_a_digit() {
        let poster = Arc::new(FakePoster::new());
        let adapter = Arc::new(FakeAdapter::new("Deploy?\n1. Yes\n2. No\n"));
        let monitor = Arc::new(Monitor::new(poster.clone(), adapter.clone()));
        monitor.register(session("s1"));

        monitor.poll_once().await;
        assert_eq!(poster.reactions.lock().unwrap().len(), 2);

        monitor.handle_reaction("post-0", "two").await.unwrap();
        let sent = adapter.sent_keys.lock().unwrap();
        assert_eq!(sent[0], ("s1".to_string(), "2".to_string()));
    }
}
