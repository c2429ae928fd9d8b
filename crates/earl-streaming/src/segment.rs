use earl_protocol::events::ToolUse;
use serde_json::Value;

/// One piece of the assistant's in-progress reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Tool(String),
}

impl Segment {
    pub fn as_text(&self) -> &str {
        match self {
            Segment::Text(s) | Segment::Tool(s) => s,
        }
    }
}

/// Render the `segments` list into the post body (§6.2: joined with `\n\n`).
pub fn full_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(Segment::as_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Format one tool-use event per the §6.2 table. `AskUserQuestion` is
/// handled by the caller before this is ever reached.
pub fn format_tool_segment(tool_use: &ToolUse) -> String {
    match tool_use.name.as_str() {
        "Bash" => {
            let command = tool_use
                .input
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!("🔧 ```\n{command}\n```")
        }
        "Read" => format!("📖 {}", file_path_of(tool_use)),
        "Write" => format!("📝 {}", file_path_of(tool_use)),
        "Edit" => format!("✏️ {}", file_path_of(tool_use)),
        "Glob" | "Grep" => format!("🔍 {}", pattern_of(tool_use)),
        "WebFetch" | "WebSearch" => format!("🌐 {}", url_or_query_of(tool_use)),
        other => {
            if is_empty_input(&tool_use.input) {
                format!("⚙️ `{other}`")
            } else {
                format!("⚙️ `{other}` {}", tool_use.input)
            }
        }
    }
}

fn file_path_of(tool_use: &ToolUse) -> String {
    tool_use
        .input
        .get("file_path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn pattern_of(tool_use: &ToolUse) -> String {
    tool_use
        .input
        .get("pattern")
        .or_else(|| tool_use.input.get("path"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn url_or_query_of(tool_use: &ToolUse) -> String {
    tool_use
        .input
        .get("url")
        .or_else(|| tool_use.input.get("query"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// True when `input` is `null`, an empty object, or an object whose every
/// value is `null`.
fn is_empty_input(input: &Value) -> bool {
    match input {
        Value::Null => true,
        Value::Object(map) => map.is_empty() || map.values().all(Value::is_null),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, input: Value) -> ToolUse {
        ToolUse {
            id: "t1".to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[test]
    fn bash_wraps_command_in_fence() {
        let t = tool("Bash", json!({"command": "ls -la"}));
        let s = format_tool_segment(&t);
        assert!(s.starts_with("🔧"));
        assert!(s.contains("```\nls -la\n```"));
    }

    #[test]
    fn read_shows_file_path() {
        let t = tool("Read", json!({"file_path": "/tmp/x.rs"}));
        assert_eq!(format_tool_segment(&t), "📖 /tmp/x.rs");
    }

    #[test]
    fn grep_prefers_pattern_over_path() {
        let t = tool("Grep", json!({"pattern": "foo", "path": "/tmp"}));
        assert_eq!(format_tool_segment(&t), "🔍 foo");
    }

    #[test]
    fn unknown_tool_with_empty_input_omits_json() {
        let t = tool("CustomTool", json!(null));
        assert_eq!(format_tool_segment(&t), "⚙️ `CustomTool`");
    }

    #[test]
    fn unknown_tool_with_all_null_values_omits_json() {
        let t = tool("CustomTool", json!({"a": null, "b": null}));
        assert_eq!(format_tool_segment(&t), "⚙️ `CustomTool`");
    }

    #[test]
    fn unknown_tool_with_input_appends_json() {
        let t = tool("CustomTool", json!({"a": 1}));
        let s = format_tool_segment(&t);
        assert!(s.starts_with("⚙️ `CustomTool`"));
        assert!(s.contains("\"a\":1"));
    }

    #[test]
    fn full_text_joins_with_blank_line() {
        let segments = vec![Segment::Text("a".to_string()), Segment::Tool("b".to_string())];
        assert_eq!(full_text(&segments), "a\n\nb");
    }
}
