use serde_json::{Map, Value};
use std::io;
use std::path::Path;

/// A single `mcpServers` entry.
#[derive(Debug, Clone)]
pub struct McpServerEntry {
    pub name: String,
    pub value: Value,
}

/// The generated MCP configuration document (§6.1): a JSON object with a
/// top-level `mcpServers` map. The built-in permission-prompt server always
/// wins over a user-supplied entry of the same key.
#[derive(Debug, Clone, Default)]
pub struct McpConfig {
    servers: Map<String, Value>,
}

pub const PERMISSION_PROMPT_SERVER_NAME: &str = "earl-permission-prompt";

impl McpConfig {
    /// Start from the merged contents of a local `mcp_servers.json`
    /// (tolerant of malformed input — on any error an empty map is used).
    pub fn from_user_servers_json(raw: &str) -> Self {
        let servers = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.get("mcpServers").cloned())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        Self { servers }
    }

    /// Install the built-in permission-prompt server, overwriting any
    /// user-supplied entry of the same name.
    pub fn with_permission_prompt(mut self, mcp_binary: &str) -> Self {
        self.servers.insert(
            PERMISSION_PROMPT_SERVER_NAME.to_string(),
            serde_json::json!({
                "type": "stdio",
                "command": mcp_binary,
                "args": ["mcp-permission-prompt"],
            }),
        );
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({ "mcpServers": Value::Object(self.servers.clone()) })
    }

    /// Write the document to `path` with file mode 0600, atomically enough
    /// for a short-lived per-session config (no rename dance needed — the
    /// file is unique per session and cleaned up on session exit).
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let body = serde_json::to_string(&self.to_json())?;
        std::fs::write(path, body)?;
        set_owner_only(path)
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// True if `filename` (no directory component) matches one of the active
/// session ids, following the `earl-mcp-<session_id>.json` naming scheme.
/// Used to clean up stale per-session MCP config files on startup.
pub fn is_stale_mcp_file(filename: &str, active_session_ids: &[String]) -> bool {
    let Some(stem) = filename
        .strip_prefix("earl-mcp-")
        .and_then(|s| s.strip_suffix(".json"))
    else {
        return false;
    };
    !active_session_ids.iter().any(|id| id == stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_prompt_overrides_user_entry_of_same_name() {
        let config = McpConfig::from_user_servers_json(
            r#"{"mcpServers":{"earl-permission-prompt":{"type":"stdio","command":"evil"}}}"#,
        )
        .with_permission_prompt("/usr/local/bin/earl-mcp");

        let json = config.to_json();
        let cmd = json["mcpServers"][PERMISSION_PROMPT_SERVER_NAME]["command"]
            .as_str()
            .unwrap();
        assert_eq!(cmd, "/usr/local/bin/earl-mcp");
    }

    #[test]
    fn malformed_user_servers_json_yields_empty_map() {
        let config = McpConfig::from_user_servers_json("not json");
        assert_eq!(config.to_json()["mcpServers"].as_object().unwrap().len(), 0);
    }

    #[test]
    fn stale_file_detection_matches_active_ids() {
        let active = vec!["abc-123".to_string()];
        assert!(!is_stale_mcp_file("earl-mcp-abc-123.json", &active));
        assert!(is_stale_mcp_file("earl-mcp-def-456.json", &active));
        assert!(!is_stale_mcp_file("not-an-mcp-file.json", &active));
    }
}
