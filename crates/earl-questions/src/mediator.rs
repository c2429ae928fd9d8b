use async_trait::async_trait;
use dashmap::DashMap;
use earl_core::{ChannelId, ThreadId};
use earl_protocol::events::ToolUse;
use tracing::warn;

use crate::types::{parse_questions, PendingInteraction, Question};

/// The narrow seam to the chat platform this mediator needs: posting and
/// deleting question posts, and reacting to them with numbered emoji.
#[async_trait]
pub trait ReactionPoster: Send + Sync {
    async fn create_post(&self, channel_id: &ChannelId, thread_id: &ThreadId, text: &str) -> Option<String>;
    async fn delete_post(&self, post_id: &str) -> bool;
    async fn add_reaction(&self, post_id: &str, emoji_name: &str) -> bool;
}

/// Fixed emoji -> option index table (§4.6).
const EMOJI_ORDER: [&str; 4] = ["one", "two", "three", "four"];

fn emoji_index(emoji_name: &str) -> Option<usize> {
    EMOJI_ORDER.iter().position(|e| *e == emoji_name)
}

pub struct HandleToolUseResult {
    pub tool_use_id: String,
    /// Present only when question-posting itself failed.
    pub answer_text: Option<String>,
}

pub struct ReactionResult {
    pub tool_use_id: String,
    pub answer_text: String,
}

fn format_question_post(question: &Question) -> String {
    let mut body = question.text.clone();
    body.push('\n');
    for (i, option) in question.options.iter().take(4).enumerate() {
        body.push('\n');
        body.push_str(&format!("{}. {}", i + 1, option.label));
        if let Some(desc) = &option.description {
            body.push_str(" — ");
            body.push_str(desc);
        }
    }
    body
}

/// Mediates `AskUserQuestion` tool-uses into chat posts with numbered
/// reactions, and reaction events back into assistant answer text.
pub struct Mediator<P: ReactionPoster> {
    poster: P,
    pending: DashMap<String, PendingInteraction>,
}

impl<P: ReactionPoster> Mediator<P> {
    pub fn new(poster: P) -> Self {
        Self {
            poster,
            pending: DashMap::new(),
        }
    }

    pub async fn handle_tool_use(
        &self,
        thread_id: &ThreadId,
        channel_id: &ChannelId,
        tool_use: &ToolUse,
    ) -> Option<HandleToolUseResult> {
        if tool_use.name != "AskUserQuestion" {
            return None;
        }

        let mut questions = parse_questions(&tool_use.input);
        if questions.is_empty() {
            return None;
        }

        let first = questions.remove(0);
        let body = format_question_post(&first);

        let Some(post_id) = self.poster.create_post(channel_id, thread_id, &body).await else {
            return Some(HandleToolUseResult {
                tool_use_id: tool_use.id.clone(),
                answer_text: Some("Failed to post question".to_string()),
            });
        };

        let option_count = first.options.len().min(4);
        let current_options: Vec<String> = first.options.iter().take(4).map(|o| o.label.clone()).collect();

        self.pending.insert(
            post_id.clone(),
            PendingInteraction {
                tool_use_id: tool_use.id.clone(),
                thread_id: thread_id.clone(),
                channel_id: channel_id.clone(),
                remaining_questions: questions,
                collected_answers: Vec::new(),
                current_question: first.text.clone(),
                current_options,
            },
        );

        for emoji in EMOJI_ORDER.iter().take(option_count) {
            if !self.poster.add_reaction(&post_id, emoji).await {
                warn!(post_id = %post_id, emoji = %emoji, "failed to add question reaction");
            }
        }

        Some(HandleToolUseResult {
            tool_use_id: tool_use.id.clone(),
            answer_text: None,
        })
    }

    pub async fn handle_reaction(&self, post_id: &str, emoji_name: &str) -> Option<ReactionResult> {
        let mut entry = self.pending.get_mut(post_id)?;

        let index = emoji_index(emoji_name)?;
        if index >= entry.current_options.len() {
            return None;
        }

        let chosen_label = entry.current_options[index].clone();
        entry
            .collected_answers
            .push((entry.current_question.clone(), chosen_label));

        self.poster.delete_post(post_id).await;

        if entry.remaining_questions.is_empty() {
            let tool_use_id = entry.tool_use_id.clone();
            let answer_text = compose_final_answer(&entry.collected_answers);
            drop(entry);
            self.pending.remove(post_id);
            return Some(ReactionResult {
                tool_use_id,
                answer_text,
            });
        }

        let thread_id = entry.thread_id.clone();
        let channel_id = entry.channel_id.clone();
        let tool_use_id = entry.tool_use_id.clone();
        let mut collected_answers = entry.collected_answers.clone();
        let mut remaining = entry.remaining_questions.clone();
        drop(entry);
        self.pending.remove(post_id);

        let next = remaining.remove(0);
        let body = format_question_post(&next);
        if let Some(new_post_id) = self.poster.create_post(&channel_id, &thread_id, &body).await {
            let option_count = next.options.len().min(4);
            let current_options: Vec<String> = next.options.iter().take(4).map(|o| o.label.clone()).collect();
            self.pending.insert(
                new_post_id.clone(),
                PendingInteraction {
                    tool_use_id,
                    thread_id,
                    channel_id,
                    remaining_questions: remaining,
                    collected_answers: std::mem::take(&mut collected_answers),
                    current_question: next.text.clone(),
                    current_options,
                },
            );
            for emoji in EMOJI_ORDER.iter().take(option_count) {
                let _ = self.poster.add_reaction(&new_post_id, emoji).await;
            }
        }

        None
    }
}

fn compose_final_answer(collected: &[(String, String)]) -> String {
    collected
        .iter()
        .map(|(question, label)| format!("{question}: {label}"))
        .collect::<Vec<_>>()
        .join("\n")
}
