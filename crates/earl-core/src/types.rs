use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a Mattermost thread (the post id of the thread root).
///
/// All per-conversation state — the live [`Session`](../../earl-sessions), the
/// message queue, pending questions — is keyed by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies a Mattermost channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Permission mode a session or heartbeat runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Prompts are answered automatically without asking in chat.
    Auto,
    /// Tool-use permission prompts are relayed to chat and awaited.
    #[default]
    Interactive,
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionMode::Auto => write!(f, "auto"),
            PermissionMode::Interactive => write!(f, "interactive"),
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(PermissionMode::Auto),
            "interactive" => Ok(PermissionMode::Interactive),
            other => Err(format!("unknown permission mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_display_roundtrips_string() {
        let t = ThreadId::from("abc123");
        assert_eq!(t.to_string(), "abc123");
        assert_eq!(t.as_str(), "abc123");
    }

    #[test]
    fn permission_mode_from_str() {
        assert_eq!(
            "auto".parse::<PermissionMode>().unwrap(),
            PermissionMode::Auto
        );
        assert!("bogus".parse::<PermissionMode>().is_err());
    }
}
