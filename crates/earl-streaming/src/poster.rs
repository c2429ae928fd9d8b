use async_trait::async_trait;
use earl_core::{ChannelId, ThreadId};

/// The narrow seam to the chat platform. Kept deliberately small so tests can
/// supply an in-memory fake and assert on call counts.
#[async_trait]
pub trait ChatPoster: Send + Sync {
    /// Create a post in `thread_id` (root post in `channel_id` if the thread
    /// doesn't exist yet). Returns the new post id, or `None` on failure.
    async fn create_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, text: &str) -> Option<String>;

    /// Replace the body of an existing post. Returns `true` on success.
    async fn update_post(&self, post_id: &str, text: &str) -> bool;

    async fn delete_post(&self, post_id: &str) -> bool;

    /// Issue one typing-indicator beat for `channel_id`. Returns `false` on
    /// a transport error, which stops the typing task for good.
    async fn typing(&self, channel_id: &ChannelId) -> bool;

    /// Upload a file, returning its platform file id on success.
    async fn upload_file(&self, channel_id: &ChannelId, path: &str) -> Option<String>;

    /// Create a post whose body is a set of previously uploaded file ids.
    async fn create_file_post(
        &self,
        channel_id: &ChannelId,
        thread_id: &ThreadId,
        file_ids: &[String],
    ) -> Option<String>;
}
