//! REST client for the Mattermost chat platform (§4.5/§4.6 `ChatPoster`/
//! `ReactionPoster` seams).

use async_trait::async_trait;
use earl_core::{ChannelId, ThreadId};
use earl_questions::ReactionPoster;
use earl_streaming::ChatPoster;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use tracing::warn;

/// Thin REST binding. Holds its own `reqwest::Client` and bearer token;
/// cheap to clone (internally `Arc`-backed by `reqwest`).
#[derive(Clone)]
pub struct MattermostClient {
    http: HttpClient,
    base_url: String,
    token: String,
    bot_user_id: String,
}

impl MattermostClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, bot_user_id: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
            token: token.into(),
            bot_user_id: bot_user_id.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url.trim_end_matches('/'))
    }

    async fn do_create_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, text: &str) -> Option<String> {
        let root_id = if thread_id.as_str() == channel_id.as_str() { "" } else { thread_id.as_str() };
        let body = json!({
            "channel_id": channel_id.as_str(),
            "message": text,
            "root_id": root_id,
        });
        let resp = self
            .http
            .post(self.url("/posts"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| warn!(error = %e, "create_post failed"))
            .ok()?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "create_post rejected");
            return None;
        }
        let post: Value = resp.json().await.ok()?;
        post.get("id").and_then(Value::as_str).map(str::to_string)
    }

    async fn do_update_post(&self, post_id: &str, text: &str) -> bool {
        let body = json!({ "message": text });
        self.http
            .put(self.url(&format!("/posts/{post_id}/patch")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn do_delete_post(&self, post_id: &str) -> bool {
        self.http
            .delete(self.url(&format!("/posts/{post_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn do_add_reaction(&self, post_id: &str, emoji_name: &str) -> bool {
        let body = json!({
            "user_id": self.bot_user_id,
            "post_id": post_id,
            "emoji_name": emoji_name,
        });
        self.http
            .post(self.url("/reactions"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn do_typing(&self, channel_id: &ChannelId) -> bool {
        self.http
            .post(self.url(&format!("/channels/{}/typing", channel_id.as_str())))
            .bearer_auth(&self.token)
            .json(&json!({ "parent_id": "" }))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn do_upload_file(&self, channel_id: &ChannelId, path: &str) -> Option<String> {
        let bytes = tokio::fs::read(path).await.ok()?;
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel_id.as_str().to_string())
            .part("files", part);

        let resp = self
            .http
            .post(self.url("/files"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        body.get("file_infos")?
            .as_array()?
            .first()?
            .get("id")?
            .as_str()
            .map(str::to_string)
    }

    /// List the emoji names of reactions a non-bot user has left on `post_id`.
    /// Used by the permission-prompt MCP server to poll for an allow/deny
    /// reaction rather than waiting on the websocket feed it has no access to.
    pub async fn get_reactions(&self, post_id: &str) -> Vec<String> {
        let resp = match self
            .http
            .get(self.url(&format!("/posts/{post_id}/reactions")))
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };
        let Ok(reactions) = resp.json::<Vec<Value>>().await else {
            return Vec::new();
        };
        reactions
            .into_iter()
            .filter(|r| r.get("user_id").and_then(Value::as_str) != Some(self.bot_user_id.as_str()))
            .filter_map(|r| r.get("emoji_name").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Oldest-first `(is_bot, message)` pairs for every non-empty post in
    /// `thread_id`'s thread. Used to build the transcript preamble a
    /// freshly created session is seeded with (§4.10 step 3).
    pub async fn list_thread_posts(&self, thread_id: &str) -> Vec<(bool, String)> {
        let resp = match self
            .http
            .get(self.url(&format!("/posts/{thread_id}/thread")))
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };
        let Ok(body) = resp.json::<Value>().await else {
            return Vec::new();
        };
        let Some(order) = body.get("order").and_then(Value::as_array) else {
            return Vec::new();
        };
        let Some(posts) = body.get("posts").and_then(Value::as_object) else {
            return Vec::new();
        };

        order
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|id| posts.get(id))
            .filter_map(|post| {
                let message = post.get("message")?.as_str()?;
                if message.is_empty() {
                    return None;
                }
                let user_id = post.get("user_id")?.as_str()?;
                Some((user_id == self.bot_user_id, message.to_string()))
            })
            .collect()
    }

    async fn do_create_file_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, file_ids: &[String]) -> Option<String> {
        let root_id = if thread_id.as_str() == channel_id.as_str() { "" } else { thread_id.as_str() };
        let body = json!({
            "channel_id": channel_id.as_str(),
            "message": "",
            "root_id": root_id,
            "file_ids": file_ids,
        });
        let resp = self
            .http
            .post(self.url("/posts"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let post: Value = resp.json().await.ok()?;
        post.get("id").and_then(Value::as_str).map(str::to_string)
    }
}

#[async_trait]
impl ChatPoster for MattermostClient {
    async fn create_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, text: &str) -> Option<String> {
        self.do_create_post(channel_id, thread_id, text).await
    }
    async fn update_post(&self, post_id: &str, text: &str) -> bool {
        self.do_update_post(post_id, text).await
    }
    async fn delete_post(&self, post_id: &str) -> bool {
        self.do_delete_post(post_id).await
    }
    async fn typing(&self, channel_id: &ChannelId) -> bool {
        self.do_typing(channel_id).await
    }
    async fn upload_file(&self, channel_id: &ChannelId, path: &str) -> Option<String> {
        self.do_upload_file(channel_id, path).await
    }
    async fn create_file_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, file_ids: &[String]) -> Option<String> {
        self.do_create_file_post(channel_id, thread_id, file_ids).await
    }
}

#[async_trait]
impl ReactionPoster for MattermostClient {
    async fn create_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, text: &str) -> Option<String> {
        self.do_create_post(channel_id, thread_id, text).await
    }
    async fn delete_post(&self, post_id: &str) -> bool {
        self.do_delete_post(post_id).await
    }
    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> bool {
        self.do_add_reaction(post_id, emoji_name).await
    }
}
