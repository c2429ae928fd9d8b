use earl_core::{ChannelId, ThreadId};

/// A chat message delivered by the `posted` WebSocket event.
#[derive(Debug, Clone)]
pub struct InboundPost {
    pub post_id: String,
    pub channel_id: ChannelId,
    /// The thread this post belongs to: its own id for a root post, or the
    /// root post's id when it's a reply.
    pub thread_id: ThreadId,
    pub user_id: String,
    pub message: String,
}

/// A reaction delivered by the `reaction_added` WebSocket event.
#[derive(Debug, Clone)]
pub struct InboundReaction {
    pub post_id: String,
    pub user_id: String,
    pub emoji_name: String,
}
