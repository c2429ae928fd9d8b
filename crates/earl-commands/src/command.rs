/// A recognized `!command`, parsed out of an incoming chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Stop,
    Cwd(String),
    Restart,
    Update,
    /// `!escape <text>` — forward `<text>` to the queue as an ordinary
    /// user message, letting a user send a literal message that starts
    /// with `!` without it being swallowed as a command.
    Escape(String),
}

/// Parse a chat message into a [`Command`], or `None` if it isn't a
/// recognized `!`-prefixed command (including plain messages that don't
/// start with `!` at all).
pub fn parse(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('!')?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name.to_ascii_lowercase().as_str() {
        "help" => Some(Command::Help),
        "status" | "sessions" => Some(Command::Status),
        "stop" | "kill" => Some(Command::Stop),
        "cwd" => Some(Command::Cwd(args.to_string())),
        "restart" => Some(Command::Restart),
        "update" => Some(Command::Update),
        "escape" => Some(Command::Escape(args.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_bang_message_is_not_a_command() {
        assert_eq!(parse("hello there"), None);
    }

    #[test]
    fn unknown_bang_command_is_ignored() {
        assert_eq!(parse("!frobnicate"), None);
    }

    #[test]
    fn help_is_case_insensitive() {
        assert_eq!(parse("!HELP"), Some(Command::Help));
    }

    #[test]
    fn status_and_sessions_are_aliases() {
        assert_eq!(parse("!status"), Some(Command::Status));
        assert_eq!(parse("!sessions"), Some(Command::Status));
    }

    #[test]
    fn stop_and_kill_are_aliases() {
        assert_eq!(parse("!stop"), Some(Command::Stop));
        assert_eq!(parse("!kill"), Some(Command::Stop));
    }

    #[test]
    fn cwd_captures_trimmed_argument() {
        assert_eq!(
            parse("!cwd   /home/user/project  "),
            Some(Command::Cwd("/home/user/project".to_string()))
        );
    }

    #[test]
    fn cwd_with_no_argument_is_empty() {
        assert_eq!(parse("!cwd"), Some(Command::Cwd(String::new())));
    }

    #[test]
    fn escape_forwards_the_remainder() {
        assert_eq!(
            parse("!escape !not-a-command really"),
            Some(Command::Escape("!not-a-command really".to_string()))
        );
    }

    #[test]
    fn leading_whitespace_before_bang_is_trimmed() {
        assert_eq!(parse("   !restart"), Some(Command::Restart));
    }
}
