use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use earl_core::{ChannelId, ThreadId};
use earl_protocol::events::ToolUse;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::poster::ChatPoster;
use crate::segment::{format_tool_segment, full_text, Segment};

pub const DEBOUNCE_MS: u64 = 300;
const TYPING_BEAT_MS: u64 = 4000;

/// Owns the composition of the assistant's reply for one turn (§4.5).
///
/// Callers hold this behind an `Arc` — the debounce timer and typing task
/// need to reach back into it from a spawned task.
pub struct StreamingResponse<P: ChatPoster + 'static> {
    poster: Arc<P>,
    channel_id: ChannelId,
    thread_id: ThreadId,

    reply_post_id: Mutex<Option<String>>,
    segments: Mutex<Vec<Segment>>,
    create_failed: AtomicBool,
    last_edit_at: Mutex<Option<Instant>>,
    image_refs: Mutex<Vec<String>>,

    typing_task: Mutex<Option<JoinHandle<()>>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: ChatPoster + 'static> StreamingResponse<P> {
    pub fn new(poster: Arc<P>, channel_id: ChannelId, thread_id: ThreadId) -> Arc<Self> {
        Arc::new(Self {
            poster,
            channel_id,
            thread_id,
            reply_post_id: Mutex::new(None),
            segments: Mutex::new(Vec::new()),
            create_failed: AtomicBool::new(false),
            last_edit_at: Mutex::new(None),
            image_refs: Mutex::new(Vec::new()),
            typing_task: Mutex::new(None),
            debounce_task: Mutex::new(None),
        })
    }

    pub async fn full_text(&self) -> String {
        full_text(&self.segments.lock().await)
    }

    /// Launch a cooperative task that periodically issues a typing indicator
    /// until `stop_typing` is called or a transport error occurs.
    pub fn start_typing(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if !this.poster.typing(&this.channel_id).await {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(TYPING_BEAT_MS)).await;
            }
        });
        // Replacing a still-running task (there should only ever be one) aborts the old one.
        if let Ok(mut guard) = self.typing_task.try_lock() {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }
    }

    async fn stop_typing(&self) {
        if let Some(handle) = self.typing_task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn on_text(self: &Arc<Self>, chunk: &str) {
        self.stop_typing().await;

        {
            let mut segments = self.segments.lock().await;
            match segments.last_mut() {
                Some(Segment::Text(s)) => s.push_str(chunk),
                _ => segments.push(Segment::Text(chunk.to_string())),
            }
        }

        let full = self.full_text().await;
        let has_post = self.reply_post_id.lock().await.is_some();

        if !has_post && !self.create_failed.load(Ordering::SeqCst) {
            self.create_initial_post(&full).await;
            return;
        }

        if has_post {
            let debounce_elapsed = {
                let last = self.last_edit_at.lock().await;
                last.map(|t| t.elapsed().as_millis() as u64 >= DEBOUNCE_MS)
                    .unwrap_or(true)
            };

            if debounce_elapsed {
                self.edit_now(&full).await;
            } else {
                self.schedule_debounce();
            }
        }
    }

    pub async fn on_tool_use(self: &Arc<Self>, tool_use: &ToolUse) {
        if tool_use.name == "AskUserQuestion" {
            return;
        }

        let formatted = format_tool_segment(tool_use);
        self.segments.lock().await.push(Segment::Tool(formatted));

        let full = self.full_text().await;
        let has_post = self.reply_post_id.lock().await.is_some();

        if !has_post && !self.create_failed.load(Ordering::SeqCst) {
            self.create_initial_post(&full).await;
        } else if has_post {
            self.edit_now(&full).await;
        }
    }

    pub async fn on_tool_result(&self, image_refs: &[String]) {
        self.image_refs.lock().await.extend_from_slice(image_refs);
    }

    /// Finalize the turn per §4.5 step 6.
    pub async fn on_complete(self: &Arc<Self>) {
        if let Some(handle) = self.debounce_task.lock().await.take() {
            handle.abort();
            let full = self.full_text().await;
            if self.reply_post_id.lock().await.is_some() {
                self.edit_now(&full).await;
            }
        }
        self.stop_typing().await;

        let full = self.full_text().await;
        let has_post = self.reply_post_id.lock().await.is_some();

        if full.is_empty() && !has_post {
            return;
        }

        let is_pure_text = {
            let segments = self.segments.lock().await;
            segments.len() == 1 && matches!(segments.first(), Some(Segment::Text(_)))
        };

        if is_pure_text {
            if let Some(post_id) = self.reply_post_id.lock().await.clone() {
                let _ = self.poster.update_post(&post_id, &full).await;
            }
            self.upload_images().await;
            return;
        }

        let final_text = {
            let mut segments = self.segments.lock().await;
            let last_text_idx = segments
                .iter()
                .rposition(|s| matches!(s, Segment::Text(_)));
            match last_text_idx {
                Some(idx) => match segments.remove(idx) {
                    Segment::Text(text) => text,
                    Segment::Tool(text) => text,
                },
                None => String::new(),
            }
        };

        let remaining = self.full_text().await;
        if !remaining.is_empty() {
            if let Some(post_id) = self.reply_post_id.lock().await.clone() {
                let _ = self.poster.update_post(&post_id, &remaining).await;
            }
        }

        if !final_text.is_empty() {
            let created = self
                .poster
                .create_post(&self.channel_id, &self.thread_id, &final_text)
                .await;
            if created.is_none() {
                warn!(thread_id = %self.thread_id, "failed to create final-text post after tool segments");
            }
        }

        self.upload_images().await;
    }

    async fn upload_images(&self) {
        let refs = self.image_refs.lock().await.clone();
        if refs.is_empty() {
            return;
        }
        let mut file_ids = Vec::new();
        for path in &refs {
            if let Some(id) = self.poster.upload_file(&self.channel_id, path).await {
                file_ids.push(id);
            }
        }
        if file_ids.is_empty() {
            debug!(thread_id = %self.thread_id, "all image uploads failed, skipping file post");
            return;
        }
        let _ = self
            .poster
            .create_file_post(&self.channel_id, &self.thread_id, &file_ids)
            .await;
    }

    async fn create_initial_post(&self, full_text: &str) {
        match self
            .poster
            .create_post(&self.channel_id, &self.thread_id, full_text)
            .await
        {
            Some(post_id) => {
                *self.reply_post_id.lock().await = Some(post_id);
                *self.last_edit_at.lock().await = Some(Instant::now());
            }
            None => {
                self.create_failed.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn edit_now(&self, full_text: &str) {
        let post_id = self.reply_post_id.lock().await.clone();
        if let Some(post_id) = post_id {
            let _ = self.poster.update_post(&post_id, full_text).await;
            *self.last_edit_at.lock().await = Some(Instant::now());
        }
    }

    fn schedule_debounce(self: &Arc<Self>) {
        if let Ok(guard) = self.debounce_task.try_lock() {
            if guard.is_some() {
                return;
            }
        } else {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(DEBOUNCE_MS)).await;
            let full = this.full_text().await;
            this.edit_now(&full).await;
            this.debounce_task.lock().await.take();
        });

        if let Ok(mut guard) = self.debounce_task.try_lock() {
            *guard = Some(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct FakePoster {
        creates: AtomicUsize,
        updates: AtomicUsize,
        deletes: AtomicUsize,
        last_body: TokioMutex<Option<String>>,
        post_id_counter: AtomicUsize,
        fail_create: AtomicBool,
    }

    #[async_trait]
    impl ChatPoster for FakePoster {
        async fn create_post(&self, _channel_id: &ChannelId, _thread_id: &ThreadId, text: &str) -> Option<String> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            *self.last_body.lock().await = Some(text.to_string());
            if self.fail_create.load(Ordering::SeqCst) {
                return None;
            }
            let id = self.post_id_counter.fetch_add(1, Ordering::SeqCst);
            Some(format!("post-{id}"))
        }

        async fn update_post(&self, _post_id: &str, text: &str) -> bool {
            self.updates.fetch_add(1, Ordering::SeqCst);
            *self.last_body.lock().await = Some(text.to_string());
            true
        }

        async fn delete_post(&self, _post_id: &str) -> bool {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn typing(&self, _channel_id: &ChannelId) -> bool {
            true
        }

        async fn upload_file(&self, _channel_id: &ChannelId, _path: &str) -> Option<String> {
            Some("file-1".to_string())
        }

        async fn create_file_post(
            &self,
            _channel_id: &ChannelId,
            _thread_id: &ThreadId,
            _file_ids: &[String],
        ) -> Option<String> {
            Some("file-post-1".to_string())
        }
    }

    fn ids() -> (ChannelId, ThreadId) {
        (ChannelId::from("chan"), ThreadId::from("thread"))
    }

    #[tokio::test]
    async fn pure_text_reply_creates_then_edits_on_complete() {
        let poster = Arc::new(FakePoster::default());
        let (channel, thread) = ids();
        let resp = StreamingResponse::new(Arc::clone(&poster), channel, thread);

        resp.on_text("hello").await;
        assert_eq!(poster.creates.load(Ordering::SeqCst), 1);

        resp.on_complete().await;
        assert_eq!(poster.updates.load(Ordering::SeqCst), 1);
        assert_eq!(
            poster.last_body.lock().await.as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn create_failure_sets_flag_and_never_retries() {
        let poster = Arc::new(FakePoster {
            fail_create: AtomicBool::new(true),
            ..Default::default()
        });
        let (channel, thread) = ids();
        let resp = StreamingResponse::new(Arc::clone(&poster), channel, thread);

        resp.on_text("hello").await;
        resp.on_text(" world").await;
        assert_eq!(poster.creates.load(Ordering::SeqCst), 1);
        assert!(resp.create_failed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn ask_user_question_tool_use_is_skipped() {
        let poster = Arc::new(FakePoster::default());
        let (channel, thread) = ids();
        let resp = StreamingResponse::new(Arc::clone(&poster), channel, thread);

        let tool_use = ToolUse {
            id: "t1".to_string(),
            name: "AskUserQuestion".to_string(),
            input: serde_json::json!({}),
        };
        resp.on_tool_use(&tool_use).await;
        assert!(resp.segments.lock().await.is_empty());
        assert_eq!(poster.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mixed_text_and_tool_splits_final_text_into_new_post() {
        let poster = Arc::new(FakePoster::default());
        let (channel, thread) = ids();
        let resp = StreamingResponse::new(Arc::clone(&poster), channel, thread);

        resp.on_text("working on it").await;
        let tool_use = ToolUse {
            id: "t1".to_string(),
            name: "Bash".to_string(),
            input: serde_json::json!({"command": "ls"}),
        };
        resp.on_tool_use(&tool_use).await;
        resp.on_text("done, here is the answer").await;

        let creates_before_complete = poster.creates.load(Ordering::SeqCst);
        resp.on_complete().await;

        assert_eq!(poster.creates.load(Ordering::SeqCst), creates_before_complete + 1);
        assert_eq!(
            poster.last_body.lock().await.as_deref(),
            Some("done, here is the answer")
        );
    }

    #[tokio::test]
    async fn empty_turn_with_no_post_is_a_no_op() {
        let poster = Arc::new(FakePoster::default());
        let (channel, thread) = ids();
        let resp = StreamingResponse::new(Arc::clone(&poster), channel, thread);

        resp.on_complete().await;
        assert_eq!(poster.creates.load(Ordering::SeqCst), 0);
        assert_eq!(poster.updates.load(Ordering::SeqCst), 0);
    }
}
