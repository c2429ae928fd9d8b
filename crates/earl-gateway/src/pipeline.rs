//! Per-turn orchestration (§4.4/§4.5/§4.10): incoming messages become
//! queued user turns, `!`-commands short-circuit before the queue, and
//! tool-use/reaction events are routed to whichever subsystem (question
//! mediator, terminal monitor) is waiting on them.

use std::sync::Arc;

use earl_assistant::{LaunchConfig, Session, SessionMode};
use earl_commands::{Command, ExecutionOutcome};
use earl_core::{ChannelId, PermissionMode, ThreadId};
use earl_mattermost::{InboundPost, InboundReaction};
use earl_mattermost::MattermostClient;
use earl_protocol::events::{ToolResultRefs, ToolUse};
use earl_queue::UserMessage;
use earl_streaming::{ChatPoster, StreamingResponse};
use regex::Regex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::restart_context;
use crate::runner::Runner;

const ANALYSIS_MIN_LEN: usize = 300;
const FOLLOWUP_PROMPT: &str = "Please propose concrete, actionable fixes for the root cause identified above.";

pub async fn handle_incoming_message(runner: Arc<Runner>, post: InboundPost) {
    if post.user_id == runner.config.mattermost_bot_id || post.message.trim().is_empty() {
        return;
    }
    if !runner.config.is_allowed(&post.user_id) {
        return;
    }
    if !runner.config.channels.iter().any(|c| c.channel_id == post.channel_id.as_str()) {
        return;
    }

    if let Some(command) = earl_commands::parse(&post.message) {
        handle_command(runner, post, command).await;
        return;
    }

    let msg = UserMessage::new(post.message.clone(), post.user_id.clone());
    enqueue_turn(runner, post.channel_id, post.thread_id, msg).await;
}

async fn handle_command(runner: Arc<Runner>, post: InboundPost, command: Command) {
    let Some(outcome) = runner.commands.execute(&command, &post.thread_id).await else {
        return;
    };

    match outcome {
        ExecutionOutcome::Passthrough(text) => {
            let msg = UserMessage::new(text, post.user_id);
            enqueue_turn(runner, post.channel_id, post.thread_id, msg).await;
        }
        ExecutionOutcome::Reply(text) => {
            runner.mattermost.create_post(&post.channel_id, &post.thread_id, &text).await;
        }
        ExecutionOutcome::SessionStopped => {
            if let Some((_, stream)) = runner.streams.remove(&post.thread_id) {
                stream.on_complete().await;
            }
            runner.mattermost.create_post(&post.channel_id, &post.thread_id, "Session stopped.").await;
        }
        ExecutionOutcome::RestartRequested => {
            restart_context::write_pending(&runner.config.config_root, &post.channel_id, &post.thread_id, "restart");
            runner.mattermost.create_post(&post.channel_id, &post.thread_id, "Restarting...").await;
            runner.initiate_shutdown(true, false).await;
        }
        ExecutionOutcome::UpdateRequested => {
            restart_context::write_pending(&runner.config.config_root, &post.channel_id, &post.thread_id, "update");
            runner.mattermost.create_post(&post.channel_id, &post.thread_id, "Updating and restarting...").await;
            runner.initiate_shutdown(false, true).await;
        }
    }
}

/// Enqueue one user turn, claiming the thread's queue slot and spawning the
/// run loop if nothing else is already draining it (§4.4).
async fn enqueue_turn(runner: Arc<Runner>, channel_id: ChannelId, thread_id: ThreadId, msg: UserMessage) {
    if runner.queue.try_claim(&thread_id) {
        tokio::spawn(run_claimed(runner, channel_id, thread_id, msg));
    } else {
        runner.queue.enqueue_behind(&thread_id, msg);
    }
}

/// Drain a thread's queue one message at a time, holding the claim until
/// it's empty.
async fn run_claimed(runner: Arc<Runner>, channel_id: ChannelId, thread_id: ThreadId, first: UserMessage) {
    let mut msg = first;
    loop {
        run_turn(Arc::clone(&runner), channel_id.clone(), thread_id.clone(), msg).await;
        match runner.queue.pop_next(&thread_id) {
            Some(next) => msg = next,
            None => {
                runner.queue.release(&thread_id);
                break;
            }
        }
    }
}

fn build_launch_config(runner: &Runner, channel_id: &ChannelId, thread_id: &ThreadId) -> LaunchConfig {
    let (skip_permissions, permission_config) = match runner.permission_mode() {
        PermissionMode::Auto => (true, None),
        PermissionMode::Interactive => (false, runner.interactive_permission_config.clone()),
    };

    LaunchConfig {
        command: runner.assistant_command.clone(),
        working_dir: runner.working_dir_for(channel_id, thread_id),
        channel_id: channel_id.as_str().to_string(),
        model_override: runner.config.model.clone(),
        skip_permissions,
        permission_config,
        durable_memory: None,
        mcp_config_dir: runner.mcp_config_dir.clone(),
    }
}

/// Transcript preamble a freshly started session gets seeded with when its
/// thread already had messages before the session existed (§4.10 step 3).
fn build_preamble(posts: &[(bool, String)]) -> String {
    let mut body = String::from("Earlier messages in this thread, for context:\n");
    for (is_bot, message) in posts {
        let speaker = if *is_bot { "assistant" } else { "user" };
        body.push_str(speaker);
        body.push_str(": ");
        body.push_str(message);
        body.push('\n');
    }
    body
}

async fn run_turn(runner: Arc<Runner>, channel_id: ChannelId, thread_id: ThreadId, msg: UserMessage) {
    let launch = build_launch_config(&runner, &channel_id, &thread_id);
    let session = match runner.registry.get_or_create(thread_id.as_str(), launch).await {
        Ok(session) => session,
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "failed to start session for turn");
            runner
                .mattermost
                .create_post(&channel_id, &thread_id, &format!("Failed to start a session: {e}"))
                .await;
            return;
        }
    };

    let mut text = msg.text.clone();
    if session.mode == SessionMode::Fresh {
        let posts = runner.mattermost.list_thread_posts(thread_id.as_str()).await;
        if posts.len() > 1 {
            let preamble = build_preamble(&posts[..posts.len() - 1]);
            text = format!("{preamble}\n{}", msg.text);
        }
    }

    let streaming = StreamingResponse::new(Arc::clone(&runner.mattermost), channel_id.clone(), thread_id.clone());
    runner.streams.insert(thread_id.clone(), Arc::clone(&streaming));
    streaming.start_typing();

    let (done_tx, done_rx) = oneshot::channel::<()>();
    wire_turn_callbacks(Arc::clone(&runner), &session, &streaming, &channel_id, &thread_id, done_tx);

    if !session.send_turn(&text).await {
        runner.streams.remove(&thread_id);
        streaming.on_complete().await;
        runner
            .mattermost
            .create_post(&channel_id, &thread_id, "This thread's session is no longer running; send another message to start a new one.")
            .await;
        return;
    }

    let _ = done_rx.await;
    streaming.on_complete().await;
    runner.streams.remove(&thread_id);
    runner.registry.save_stats(thread_id.as_str()).await;
    runner.registry.touch(thread_id.as_str());

    maybe_send_analysis_followup(runner, channel_id, thread_id, &streaming).await;
}

/// Glue the session's sync callbacks to the async [`StreamingResponse`] and
/// the question mediator, mirroring the heartbeat engine's
/// `wire_callbacks`, and signal `done_tx` once the turn completes.
fn wire_turn_callbacks(
    runner: Arc<Runner>,
    session: &Session,
    streaming: &Arc<StreamingResponse<MattermostClient>>,
    channel_id: &ChannelId,
    thread_id: &ThreadId,
    done_tx: oneshot::Sender<()>,
) {
    {
        let streaming = Arc::clone(streaming);
        session.on_text(move |chunk: &str| {
            let streaming = Arc::clone(&streaming);
            let chunk = chunk.to_string();
            tokio::spawn(async move { streaming.on_text(&chunk).await });
        });
    }
    {
        let streaming = Arc::clone(streaming);
        let runner = Arc::clone(&runner);
        let channel_id = channel_id.clone();
        let thread_id = thread_id.clone();
        session.on_tool_use(move |tool_use: &ToolUse| {
            let streaming = Arc::clone(&streaming);
            let runner = Arc::clone(&runner);
            let channel_id = channel_id.clone();
            let thread_id = thread_id.clone();
            let tool_use = tool_use.clone();
            tokio::spawn(async move {
                streaming.on_tool_use(&tool_use).await;
                if tool_use.name == "AskUserQuestion" {
                    handle_ask_user_question(runner, channel_id, thread_id, tool_use).await;
                }
            });
        });
    }
    {
        let streaming = Arc::clone(streaming);
        session.on_tool_result(move |refs: &ToolResultRefs| {
            let streaming = Arc::clone(&streaming);
            let images = refs.images.clone();
            tokio::spawn(async move { streaming.on_tool_result(&images).await });
        });
    }

    let done_tx = std::sync::Mutex::new(Some(done_tx));
    session.on_complete(move |_stats| {
        if let Some(tx) = done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    });
}

async fn handle_ask_user_question(runner: Arc<Runner>, channel_id: ChannelId, thread_id: ThreadId, tool_use: ToolUse) {
    let Some(result) = runner.mediator.handle_tool_use(&thread_id, &channel_id, &tool_use).await else {
        return;
    };

    if let Some(answer) = result.answer_text {
        if let Some(session) = runner.registry.get(thread_id.as_str()).await {
            session.send_turn(&answer).await;
        }
    } else {
        runner.tool_use_threads.insert(result.tool_use_id, thread_id);
    }
}

pub async fn handle_reaction(runner: Arc<Runner>, reaction: InboundReaction) {
    if reaction.user_id == runner.config.mattermost_bot_id {
        return;
    }

    if let Some(result) = runner.mediator.handle_reaction(&reaction.post_id, &reaction.emoji_name).await {
        if let Some((_, thread_id)) = runner.tool_use_threads.remove(&result.tool_use_id) {
            if let Some(session) = runner.registry.get(thread_id.as_str()).await {
                session.send_turn(&result.answer_text).await;
            }
        }
        return;
    }

    let _ = runner.monitor.handle_reaction(&reaction.post_id, &reaction.emoji_name).await;
}

/// If the just-completed reply looks like a root-cause analysis with no
/// suggested fixes yet, automatically ask for one — at most once per
/// thread, tracked via `analysis_followup_sent`.
fn maybe_send_analysis_followup<'a>(
    runner: Arc<Runner>,
    channel_id: ChannelId,
    thread_id: ThreadId,
    streaming: &'a Arc<StreamingResponse<MattermostClient>>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if runner.analysis_followup_sent.contains_key(&thread_id) {
            return;
        }

        let full = streaming.full_text().await;
        if full.len() < ANALYSIS_MIN_LEN {
            return;
        }

        let has_analysis = Regex::new(r"(?im)^##\s*(root cause|what went wrong)")
            .map(|re| re.is_match(&full))
            .unwrap_or(false);
        if !has_analysis {
            return;
        }

        let has_fix = Regex::new(r"(?im)^##\s*(suggested fix(es)?|recommended fix)")
            .map(|re| re.is_match(&full))
            .unwrap_or(false);
        if has_fix {
            return;
        }

        runner.analysis_followup_sent.insert(thread_id.clone(), ());
        let msg = UserMessage::new(FOLLOWUP_PROMPT, "earl");
        run_turn(runner, channel_id, thread_id, msg).await;
    })
}
