//! Output truncation helpers.
//!
//! AI agents have finite context windows, and command output can be arbitrarily
//! large (e.g. `find /`, `cat big_log.txt`).  Middle-omission truncation is
//! preferred over head/tail-only because it preserves both the beginning
//! (command invocation context) and the end (final result / error) of the
//! output.

/// Default maximum characters before truncation kicks in (30 000).
pub const DEFAULT_MAX_CHARS: usize = 30_000;

/// Truncate `output` to at most `max_chars` characters using middle-omission.
///
/// If `output` fits within `max_chars`, it is returned as-is (no allocation).
/// Otherwise the result is:
///
/// ```text
/// <first max_chars/2 chars>
///
/// ... [OUTPUT TRUNCATED: N chars omitted] ...
///
/// <last max_chars/2 chars>
/// ```
///
/// The split is done on character boundaries (not bytes), so multi-byte
/// Unicode sequences are never broken.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        // Fast path: no allocation needed when already within budget.
        return output.to_owned();
    }

    // Use character-aware splitting so we never slice across a multi-byte char.
    let chars: Vec<char> = output.chars().collect();
    let total = chars.len();

    if total <= max_chars {
        // The byte length was large but char count fits — return as-is.
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[total - half..].iter().collect();
    let omitted = total - max_chars;

    format!("{head}\n\n... [OUTPUT TRUNCATED: {omitted} chars omitted] ...\n\n{tail}")
}

/// Return the last `n` lines of `text`, joined back with `\n`.
///
/// Used to bound how much of a captured pane the classification pipeline and
/// chat alerts look at (e.g. the "last 15 lines" / "last 10 lines" windows).
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
