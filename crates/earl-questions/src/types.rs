use earl_core::{ChannelId, ThreadId};
use serde_json::Value;

/// One option a user may choose for a given question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionOption {
    pub label: String,
    pub description: Option<String>,
}

/// One question emitted inside an `AskUserQuestion` tool-use.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub text: String,
    pub options: Vec<QuestionOption>,
}

/// Parse the `AskUserQuestion` tool-use's `input` into an ordered list of
/// questions. Tolerant of either `question` or `text` as the prompt key.
pub fn parse_questions(input: &Value) -> Vec<Question> {
    let Some(list) = input.get("questions").and_then(Value::as_array) else {
        return Vec::new();
    };

    list.iter().filter_map(parse_one_question).collect()
}

fn parse_one_question(value: &Value) -> Option<Question> {
    let text = value
        .get("question")
        .or_else(|| value.get("text"))
        .and_then(Value::as_str)?
        .to_string();

    let options = value
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| opts.iter().filter_map(parse_one_option).collect())
        .unwrap_or_default();

    Some(Question { text, options })
}

fn parse_one_option(value: &Value) -> Option<QuestionOption> {
    let label = value.get("label").and_then(Value::as_str)?.to_string();
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(QuestionOption { label, description })
}

/// Runtime bookkeeping for one in-flight question sequence, keyed by the
/// post id of the currently posted question (§3 Pending interaction).
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    pub tool_use_id: String,
    pub thread_id: ThreadId,
    pub channel_id: ChannelId,
    pub remaining_questions: Vec<Question>,
    pub collected_answers: Vec<(String, String)>,
    pub current_question: String,
    pub current_options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_questions_with_options() {
        let input = json!({
            "questions": [
                {"question": "Deploy now?", "options": [
                    {"label": "Yes", "description": "do it"},
                    {"label": "No"}
                ]}
            ]
        });
        let qs = parse_questions(&input);
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].text, "Deploy now?");
        assert_eq!(qs[0].options.len(), 2);
        assert_eq!(qs[0].options[0].description.as_deref(), Some("do it"));
        assert!(qs[0].options[1].description.is_none());
    }

    #[test]
    fn missing_questions_key_yields_empty() {
        assert!(parse_questions(&json!({})).is_empty());
    }
}
