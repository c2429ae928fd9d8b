use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A `tool_use` content block emitted by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// File references collected out of a `tool_result` content block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResultRefs {
    pub images: Vec<String>,
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelUsage {
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_window: Option<u64>,
}

/// One line of the assistant's stdout event stream, decoded per the
/// `type`-dispatch table. Unknown `type` values and structurally odd
/// payloads fall back to [`AssistantEvent::Unknown`] rather than an error —
/// the wire contract tolerates unknown fields and unknown event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    System {
        subtype: Option<String>,
        message: Value,
    },
    Assistant {
        text: Option<String>,
        tool_uses: Vec<ToolUse>,
    },
    User {
        tool_result: Option<ToolResultRefs>,
    },
    Result {
        total_cost_usd: Option<f64>,
        usage: Option<Usage>,
        model_usage: Option<ModelUsage>,
    },
    Unknown(Value),
}

/// Content block union seen inside `message.content` arrays.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { content: Option<Value> },
    Other(Value),
}

impl ContentBlock {
    fn from_value(v: &Value) -> Self {
        match v.get("type").and_then(Value::as_str) {
            Some("text") => ContentBlock::Text {
                text: v
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("tool_use") => ContentBlock::ToolUse {
                id: v.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: v
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: v.get("input").cloned().unwrap_or(Value::Null),
            },
            Some("tool_result") => ContentBlock::ToolResult {
                content: v.get("content").cloned(),
            },
            _ => ContentBlock::Other(v.clone()),
        }
    }
}

/// Parse one line of the assistant's NDJSON stdout stream.
///
/// Returns `None` for blank lines and for JSON that fails to parse (logged
/// at debug). A recognized-but-empty event still returns `Some`.
pub fn parse_line(line: &str) -> Option<AssistantEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, line = trimmed, "skipping malformed assistant event line");
            return None;
        }
    };

    let kind = value.get("type").and_then(Value::as_str);
    Some(match kind {
        Some("system") => parse_system(&value),
        Some("assistant") => parse_assistant(&value),
        Some("user") => parse_user(&value),
        Some("result") => parse_result(&value),
        _ => AssistantEvent::Unknown(value),
    })
}

fn parse_system(value: &Value) -> AssistantEvent {
    AssistantEvent::System {
        subtype: value
            .get("subtype")
            .and_then(Value::as_str)
            .map(str::to_string),
        message: value.get("message").cloned().unwrap_or(Value::Null),
    }
}

fn parse_assistant(value: &Value) -> AssistantEvent {
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array);

    let Some(content) = content else {
        return AssistantEvent::Unknown(value.clone());
    };

    let mut text_buf = String::new();
    let mut tool_uses = Vec::new();

    for block in content.iter().map(ContentBlock::from_value) {
        match block {
            ContentBlock::Text { text } => text_buf.push_str(&text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_uses.push(ToolUse { id, name, input })
            }
            _ => {}
        }
    }

    AssistantEvent::Assistant {
        text: if text_buf.is_empty() {
            None
        } else {
            Some(text_buf)
        },
        tool_uses,
    }
}

fn parse_user(value: &Value) -> AssistantEvent {
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array);

    let Some(content) = content else {
        return AssistantEvent::User { tool_result: None };
    };

    let mut images = Vec::new();
    let mut texts = Vec::new();

    for block in content.iter().map(ContentBlock::from_value) {
        if let ContentBlock::ToolResult {
            content: Some(inner),
        } = block
        {
            if let Some(items) = inner.as_array() {
                for item in items {
                    match item.get("type").and_then(Value::as_str) {
                        Some("image") => {
                            if let Some(src) = item
                                .get("source")
                                .and_then(|s| s.get("path").or_else(|| s.get("data")))
                                .and_then(Value::as_str)
                            {
                                images.push(src.to_string());
                            }
                        }
                        Some("text") => {
                            if let Some(t) = item.get("text").and_then(Value::as_str) {
                                texts.push(t.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    let tool_result = if images.is_empty() && texts.is_empty() {
        None
    } else {
        Some(ToolResultRefs { images, texts })
    };

    AssistantEvent::User { tool_result }
}

fn parse_result(value: &Value) -> AssistantEvent {
    let total_cost_usd = value.get("total_cost_usd").and_then(Value::as_f64);

    let usage = value.get("usage").map(|u| Usage {
        input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        cache_read_input_tokens: u
            .get("cache_read_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cache_creation_input_tokens: u
            .get("cache_creation_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });

    let model_usage = value
        .get("modelUsage")
        .and_then(Value::as_object)
        .and_then(|map| map.iter().next())
        .map(|(model_id, v)| ModelUsage {
            model_id: model_id.clone(),
            input_tokens: v.get("inputTokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: v.get("outputTokens").and_then(Value::as_u64).unwrap_or(0),
            context_window: v.get("contextWindow").and_then(Value::as_u64),
        });

    AssistantEvent::Result {
        total_cost_usd,
        usage,
        model_usage,
    }
}

/// One-line stdin turn object: `{"type":"user","message":{"role":"user","content":"<text>"}}`.
#[derive(Serialize)]
struct TurnFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    message: TurnMessage<'a>,
}

#[derive(Serialize)]
struct TurnMessage<'a> {
    role: &'static str,
    content: &'a str,
}

pub fn turn_frame(text: &str) -> String {
    let frame = TurnFrame {
        frame_type: "user",
        message: TurnMessage {
            role: "user",
            content: text,
        },
    };
    serde_json::to_string(&frame).unwrap_or_default()
}
