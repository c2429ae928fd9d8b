//! WebSocket event listener with reconnect-with-backoff, grounded on
//! `skynet-channels::manager::connect_with_backoff`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use earl_core::{ChannelId, ThreadId};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::types::{InboundPost, InboundReaction};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Jitter fraction applied to each delay (+-10%).
const JITTER_FRACTION: f64 = 0.10;

#[async_trait]
pub trait MattermostEventHandler: Send + Sync {
    async fn on_message(&self, post: InboundPost);
    async fn on_reaction(&self, reaction: InboundReaction);
}

/// Drives the Mattermost WebSocket connection and dispatches `posted` /
/// `reaction_added` events to a handler, reconnecting forever with
/// exponential backoff when the socket drops.
pub struct MattermostListener {
    ws_url: String,
    token: String,
}

impl MattermostListener {
    pub fn new(ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into(), token: token.into() }
    }

    pub async fn run(&self, handler: Arc<dyn MattermostEventHandler>, mut shutdown: watch::Receiver<bool>) {
        let mut delay_secs = BACKOFF_BASE_SECS;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.run_once(&handler, &mut shutdown).await {
                Ok(()) => {
                    // Clean shutdown signal observed mid-connection.
                    return;
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        return;
                    }
                    let jitter = jitter_secs(delay_secs);
                    warn!(error = %e, retry_after_secs = delay_secs + jitter, "mattermost ws disconnected, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay_secs + jitter)) => {}
                        _ = shutdown.changed() => {}
                    }
                    delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
                }
            }
        }
    }

    async fn run_once(&self, handler: &Arc<dyn MattermostEventHandler>, shutdown: &mut watch::Receiver<bool>) -> Result<(), String> {
        let url = format!("{}/api/v4/websocket", self.ws_url.trim_end_matches('/'));
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| e.to_string())?;
        let (mut write, mut read) = ws.split();

        let auth = json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": self.token },
        });
        write.send(Message::Text(auth.to_string())).await.map_err(|e| e.to_string())?;
        info!("mattermost websocket connected");

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => dispatch_event(&text, handler).await,
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => return Err("connection closed".to_string()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.to_string()),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn dispatch_event(text: &str, handler: &Arc<dyn MattermostEventHandler>) {
    let Ok(envelope) = serde_json::from_str::<Value>(text) else {
        warn!("malformed mattermost websocket frame, skipping");
        return;
    };
    let Some(event) = envelope.get("event").and_then(Value::as_str) else { return };

    match event {
        "posted" => {
            if let Some(post) = parse_posted(&envelope) {
                handler.on_message(post).await;
            }
        }
        "reaction_added" => {
            if let Some(reaction) = parse_reaction(&envelope) {
                handler.on_reaction(reaction).await;
            }
        }
        _ => {}
    }
}

fn parse_posted(envelope: &Value) -> Option<InboundPost> {
    let raw_post = envelope.get("data")?.get("post")?.as_str()?;
    let post: Value = serde_json::from_str(raw_post).ok()?;

    let post_id = post.get("id")?.as_str()?.to_string();
    let channel_id = post.get("channel_id")?.as_str()?.to_string();
    let user_id = post.get("user_id")?.as_str()?.to_string();
    let message = post.get("message")?.as_str()?.to_string();
    let root_id = post.get("root_id").and_then(Value::as_str).unwrap_or("");

    let thread_id = if root_id.is_empty() { post_id.clone() } else { root_id.to_string() };

    Some(InboundPost {
        post_id,
        channel_id: ChannelId::from(channel_id),
        thread_id: ThreadId::from(thread_id),
        user_id,
        message,
    })
}

fn parse_reaction(envelope: &Value) -> Option<InboundReaction> {
    let raw_reaction = envelope.get("data")?.get("reaction")?.as_str()?;
    let reaction: Value = serde_json::from_str(raw_reaction).ok()?;

    Some(InboundReaction {
        post_id: reaction.get("post_id")?.as_str()?.to_string(),
        user_id: reaction.get("user_id")?.as_str()?.to_string(),
        emoji_name: reaction.get("emoji_name")?.as_str()?.to_string(),
    })
}

/// Deterministic pseudo-random jitter derived from the current time,
/// avoiding a `rand` dependency (mirrors the teacher's backoff helper).
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_posted_event_with_root_id() {
        let envelope = json!({
            "event": "posted",
            "data": {
                "post": json!({
                    "id": "p2",
                    "channel_id": "c1",
                    "user_id": "u1",
                    "message": "hello",
                    "root_id": "p1",
                }).to_string(),
            },
        });
        let post = parse_posted(&envelope).unwrap();
        assert_eq!(post.post_id, "p2");
        assert_eq!(post.thread_id.as_str(), "p1");
    }

    #[test]
    fn parses_posted_event_without_root_id_uses_self_as_thread() {
        let envelope = json!({
            "event": "posted",
            "data": {
                "post": json!({
                    "id": "p1",
                    "channel_id": "c1",
                    "user_id": "u1",
                    "message": "hello",
                    "root_id": "",
                }).to_string(),
            },
        });
        let post = parse_posted(&envelope).unwrap();
        assert_eq!(post.thread_id.as_str(), "p1");
    }

    #[test]
    fn parses_reaction_added_event() {
        let envelope = json!({
            "event": "reaction_added",
            "data": {
                "reaction": json!({
                    "post_id": "p1",
                    "user_id": "u1",
                    "emoji_name": "one",
                }).to_string(),
            },
        });
        let reaction = parse_reaction(&envelope).unwrap();
        assert_eq!(reaction.emoji_name, "one");
    }

    #[test]
    fn unknown_event_is_ignored() {
        let envelope = json!({ "event": "typing", "data": {} });
        assert!(parse_posted(&envelope).is_none());
    }
}
