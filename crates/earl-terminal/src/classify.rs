//! Pane-state classification pipeline (§4.9).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use regex::Regex;
use std::sync::LazyLock;

use crate::truncate::last_lines;

/// Default number of consecutive identical captures before a pane is
/// considered stalled. Spec leaves this at "4-5"; this repo picks 4.
pub const DEFAULT_STALL_THRESHOLD: u32 = 4;

/// How many trailing lines the classifier looks at for multi-line signals.
const WINDOW_LINES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    Completed,
    AskingQuestion,
    RequestingPermission,
    Errored,
    Stalled,
    Running,
}

/// Per-session stall-detection bookkeeping, carried across polls.
#[derive(Debug, Default)]
pub struct StallTracker {
    last_hash: Option<u64>,
    streak: u32,
}

impl StallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one capture, returning whether the streak reached `threshold`.
    fn observe(&mut self, capture: &str, threshold: u32) -> bool {
        let mut hasher = DefaultHasher::new();
        capture.hash(&mut hasher);
        let hash = hasher.finish();

        if self.last_hash == Some(hash) {
            self.streak += 1;
        } else {
            self.last_hash = Some(hash);
            self.streak = 1;
        }
        self.streak >= threshold
    }
}

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+[.)]").unwrap());
static QUESTION_OPTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)[.)]\s+(.+)$").unwrap());

/// Classify one pane capture, in priority order: Completed, AskingQuestion,
/// RequestingPermission, Errored, Stalled, Running.
pub fn classify(capture: &str, stall: &mut StallTracker, threshold: u32) -> PaneState {
    if let Some(last) = capture.lines().rev().find(|l| !l.trim().is_empty()) {
        if ends_with_prompt_sentinel(last) {
            return PaneState::Completed;
        }
    }

    let window = last_lines(capture, WINDOW_LINES);

    if looks_like_question(&window) {
        return PaneState::AskingQuestion;
    }
    if looks_like_permission(&window) {
        return PaneState::RequestingPermission;
    }
    if looks_like_error(&window) {
        return PaneState::Errored;
    }
    if stall.observe(capture, threshold) {
        return PaneState::Stalled;
    }
    PaneState::Running
}

/// `$ `, `# `, `% `, `❯ ` end-of-line sentinels, excluding dollar amounts like
/// `Total: 5$ ` (the char preceding `$ ` must not be a digit).
fn ends_with_prompt_sentinel(line: &str) -> bool {
    for sentinel in ["# ", "% ", "\u{276F} "] {
        if line.ends_with(sentinel) {
            return true;
        }
    }
    if let Some(prefix) = line.strip_suffix("$ ") {
        return !matches!(prefix.chars().last(), Some(c) if c.is_ascii_digit());
    }
    false
}

fn looks_like_question(window: &str) -> bool {
    let has_question_mark = window.lines().any(|l| l.contains('?'));
    let numbered_lines = window.lines().filter(|l| NUMBERED_LINE.is_match(l)).count();
    has_question_mark && numbered_lines >= 2
}

fn looks_like_permission(window: &str) -> bool {
    let has_allow_deny = window.contains("Allow") || window.contains("Deny");
    let has_prompt_phrase = window.to_lowercase().contains("do you want to");
    has_allow_deny && has_prompt_phrase
}

fn looks_like_error(window: &str) -> bool {
    window.contains("Error:") || window.contains("FAILED") || window.contains("Traceback")
}

/// Scan `capture` for the first `?` line as the question text, then collect
/// subsequent numbered-option lines (§4.9 parser). Returns `None` if either
/// the question or at least one option is missing. Capped at 4 options.
pub fn parse_question(capture: &str) -> Option<(String, Vec<String>)> {
    let lines: Vec<&str> = capture.lines().collect();
    let q_idx = lines.iter().position(|l| l.contains('?'))?;
    let question = lines[q_idx].trim().to_string();

    let options: Vec<String> = lines[q_idx + 1..]
        .iter()
        .filter_map(|l| QUESTION_OPTION_LINE.captures(l))
        .map(|c| c[2].trim().to_string())
        .take(4)
        .collect();

    if options.is_empty() {
        return None;
    }
    Some((question, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_prompt_is_completed() {
        let mut stall = StallTracker::new();
        let capture = "some output\n$ ";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Completed);
    }

    #[test]
    fn dollar_amount_is_not_mistaken_for_a_prompt() {
        let mut stall = StallTracker::new();
        let capture = "Cost: $0.05";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Running);
    }

    #[test]
    fn dollar_amount_ending_in_space_is_not_a_prompt() {
        let mut stall = StallTracker::new();
        let capture = "Total: 5$ ";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Running);
    }

    #[test]
    fn hash_prompt_is_completed() {
        let mut stall = StallTracker::new();
        assert_eq!(classify("build done\n# ", &mut stall, 4), PaneState::Completed);
    }

    #[test]
    fn numbered_question_is_detected() {
        let mut stall = StallTracker::new();
        let capture = "Continue?\n1. Yes\n2. No\n";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::AskingQuestion);
    }

    #[test]
    fn single_numbered_line_is_not_enough_for_a_question() {
        let mut stall = StallTracker::new();
        let capture = "Continue?\n1. Yes\n";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Running);
    }

    #[test]
    fn permission_prompt_is_detected() {
        let mut stall = StallTracker::new();
        let capture = "Do you want to proceed?\nAllow / Deny";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::RequestingPermission);
    }

    #[test]
    fn error_text_is_detected() {
        let mut stall = StallTracker::new();
        let capture = "Traceback (most recent call last):\nError: boom";
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Errored);
    }

    #[test]
    fn unchanged_capture_eventually_stalls() {
        let mut stall = StallTracker::new();
        let capture = "compiling...";
        for _ in 0..3 {
            assert_eq!(classify(capture, &mut stall, 4), PaneState::Running);
        }
        assert_eq!(classify(capture, &mut stall, 4), PaneState::Stalled);
    }

    #[test]
    fn a_differing_capture_resets_the_stall_counter() {
        let mut stall = StallTracker::new();
        let a = "step one";
        let b = "step two";
        for _ in 0..3 {
            classify(a, &mut stall, 4);
        }
        assert_eq!(classify(b, &mut stall, 4), PaneState::Running);
        for _ in 0..2 {
            classify(b, &mut stall, 4);
        }
        assert_eq!(classify(b, &mut stall, 4), PaneState::Stalled);
    }

    #[test]
    fn parse_question_extracts_text_and_options() {
        let capture = "preamble\nDeploy to prod?\n1. Yes\n2) No\nextra";
        let (question, options) = parse_question(capture).unwrap();
        assert_eq!(question, "Deploy to prod?");
        assert_eq!(options, vec!["Yes", "No"]);
    }

    #[test]
    fn parse_question_caps_at_four_options() {
        let capture = "Pick one?\n1. a\n2. b\n3. c\n4. d\n5. e";
        let (_, options) = parse_question(capture).unwrap();
        assert_eq!(options.len(), 4);
    }

    #[test]
    fn parse_question_without_options_returns_none() {
        assert!(parse_question("Is this a question?\nno options here").is_none());
    }

    #[test]
    fn parse_question_without_question_mark_returns_none() {
        assert!(parse_question("1. Yes\n2. No").is_none());
    }
}
