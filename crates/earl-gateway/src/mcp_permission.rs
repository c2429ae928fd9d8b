//! Permission-prompt MCP server (§6.1): a JSON-RPC 2.0 stdio server the
//! assistant subprocess launches itself via `--permission-prompt-tool`,
//! grounded on the bridge loop in the teacher's `mcp_bridge.rs` but serving
//! a single tool that relays the request into chat and awaits a ✅/❌
//! reaction instead of touching a database.
//!
//! The channel to post into is read from `EARL_CHANNEL_ID`, inherited from
//! the assistant process this server was spawned by (itself inherited from
//! the `earl-gateway` process's own `EARL_CHANNELS`/`EARL_CHANNEL_ID`). Each
//! request is posted as a new thread in that channel — the calling chat
//! thread isn't available to this standalone process, so precise thread
//! correlation is traded for a self-contained subprocess (see DESIGN.md).

use std::time::Duration;

use earl_core::ChannelId;
use earl_mattermost::MattermostClient;
use earl_questions::ReactionPoster;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

const TOOL_NAME: &str = "earl_permission_prompt";
const ALLOW_EMOJI: &str = "white_check_mark";
const DENY_EMOJI: &str = "x";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(&mut stdout, json!(null), Some(rpc_error(-32700, &format!("parse error: {e}"))), None).await?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let is_notification = request.get("id").is_none();
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        match method {
            "initialize" => {
                write_response(
                    &mut stdout,
                    id,
                    None,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "earl-permission-prompt", "version": env!("CARGO_PKG_VERSION") }
                    })),
                )
                .await?;
            }
            "notifications/initialized" => {}
            "tools/list" => {
                write_response(&mut stdout, id, None, Some(json!({ "tools": [tool_definition()] }))).await?;
            }
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(json!({}));
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                let result = handle_permission_request(&arguments).await;
                write_response(
                    &mut stdout,
                    id,
                    None,
                    Some(json!({ "content": [{"type": "text", "text": result.to_string()}], "isError": false })),
                )
                .await?;
            }
            _ => {
                if !is_notification {
                    write_response(&mut stdout, id, Some(rpc_error(-32601, &format!("method not found: {method}"))), None).await?;
                }
            }
        }
    }

    Ok(())
}

fn tool_definition() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Ask a human in chat to allow or deny a tool call",
        "inputSchema": {
            "type": "object",
            "properties": {
                "tool_name": { "type": "string" },
                "input": {}
            },
            "required": ["tool_name", "input"]
        }
    })
}

/// Post the request into chat and poll for an allow/deny reaction, returning
/// the `{"behavior": "allow"|"deny", ...}` body the permission-prompt-tool
/// protocol expects.
async fn handle_permission_request(arguments: &Value) -> Value {
    let tool_name = arguments.get("tool_name").and_then(Value::as_str).unwrap_or("unknown tool");
    let input = arguments.get("input").cloned().unwrap_or(Value::Null);

    let Ok(channel_id) = std::env::var("EARL_CHANNEL_ID") else {
        return deny("no channel configured for permission prompts");
    };
    let Ok(base_url) = std::env::var("MATTERMOST_URL") else {
        return deny("mattermost is not configured");
    };
    let Ok(token) = std::env::var("MATTERMOST_BOT_TOKEN") else {
        return deny("mattermost is not configured");
    };
    let bot_user_id = std::env::var("MATTERMOST_BOT_ID").unwrap_or_default();

    let client = MattermostClient::new(base_url, token, bot_user_id);
    let channel_id = ChannelId::from(channel_id);
    let thread_id = earl_core::ThreadId::from(channel_id.as_str());

    let body = format!(
        "\u{1F512} Permission requested for `{tool_name}`\n```json\n{}\n```\nReact with :white_check_mark: to allow or :x: to deny.",
        serde_json::to_string_pretty(&input).unwrap_or_default()
    );

    let Some(post_id) = client.create_post(&channel_id, &thread_id, &body).await else {
        return deny("failed to post permission request");
    };
    let _ = client.add_reaction(&post_id, ALLOW_EMOJI).await;
    let _ = client.add_reaction(&post_id, DENY_EMOJI).await;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() >= deadline {
            client.delete_post(&post_id).await;
            return deny("timed out waiting for a response");
        }
        tokio::time::sleep(POLL_INTERVAL).await;

        let reactions = client.get_reactions(&post_id).await;
        if reactions.iter().any(|e| e == ALLOW_EMOJI) {
            client.delete_post(&post_id).await;
            return json!({ "behavior": "allow", "updatedInput": input });
        }
        if reactions.iter().any(|e| e == DENY_EMOJI) {
            client.delete_post(&post_id).await;
            return deny("denied by user");
        }
    }
}

fn deny(message: &str) -> Value {
    json!({ "behavior": "deny", "message": message })
}

fn rpc_error(code: i64, message: &str) -> Value {
    json!({ "code": code, "message": message })
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    id: Value,
    error: Option<Value>,
    result: Option<Value>,
) -> anyhow::Result<()> {
    let mut response = json!({ "jsonrpc": "2.0", "id": id });
    if let Some(error) = error {
        response["error"] = error;
    } else if let Some(result) = result {
        response["result"] = result;
    }
    let line = format!("{response}\n");
    if let Err(e) = stdout.write_all(line.as_bytes()).await {
        warn!(error = %e, "failed to write mcp response");
    }
    stdout.flush().await?;
    Ok(())
}
