use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EarlError, Result};

pub const DEFAULT_TMUX_POLL_INTERVAL_SECS: u64 = 5;

/// One channel earl is bridging: a Mattermost channel paired with the working
/// directory new sessions in that channel should spawn in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelBinding {
    pub channel_id: String,
    pub working_dir: String,
}

/// Top-level config (earl.toml + EARL_* env overrides).
///
/// Mirrors the environment variable table: `MATTERMOST_URL`,
/// `MATTERMOST_BOT_TOKEN`, `MATTERMOST_BOT_ID`, `EARL_CHANNEL_ID`,
/// `EARL_CHANNELS`, `EARL_ALLOWED_USERS`, `EARL_SKIP_PERMISSIONS`,
/// `EARL_MODEL`, `EARL_CLAUDE_HOME`, `EARL_TMUX_POLL_INTERVAL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlConfig {
    pub mattermost_url: String,
    pub mattermost_bot_token: String,
    pub mattermost_bot_id: String,
    /// Resolved channel bindings. Populated from `EARL_CHANNELS` when
    /// present, otherwise a single entry derived from `EARL_CHANNEL_ID`.
    pub channels: Vec<ChannelBinding>,
    /// Empty means allow everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub skip_permissions: bool,
    pub model: Option<String>,
    pub claude_home: Option<String>,
    #[serde(default = "default_tmux_poll_interval")]
    pub tmux_poll_interval_secs: u64,
    /// Directory persisted state (sessions.json, tmux_sessions.json, mcp/,
    /// restart_context.json) is written under.
    #[serde(default = "default_config_root")]
    pub config_root: String,
}

fn default_tmux_poll_interval() -> u64 {
    DEFAULT_TMUX_POLL_INTERVAL_SECS
}

fn default_config_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.earl", home)
}

impl EarlConfig {
    /// Load from an optional TOML file merged with `EARL_`-prefixed env vars.
    ///
    /// Used for settings that don't fit the flat env-var table (e.g. to seed
    /// defaults in tests or local dev). Production deployments are expected
    /// to rely on [`EarlConfig::from_env`].
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| format!("{}/earl.toml", default_config_root()));

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EARL_").split("_"))
            .extract()
            .map_err(|e| EarlError::Config(e.to_string()))
    }

    /// Load strictly from the environment variables in the spec's table.
    pub fn from_env() -> Result<Self> {
        let mattermost_url = require_env("MATTERMOST_URL")?;
        validate_http_url(&mattermost_url)?;

        let mattermost_bot_token = require_env("MATTERMOST_BOT_TOKEN")?;
        let mattermost_bot_id = require_env("MATTERMOST_BOT_ID")?;

        let channels = if let Ok(raw) = std::env::var("EARL_CHANNELS") {
            parse_channels(&raw)
        } else {
            let channel_id = require_env("EARL_CHANNEL_ID")?;
            vec![ChannelBinding {
                channel_id,
                working_dir: default_working_dir(),
            }]
        };

        let allowed_users = std::env::var("EARL_ALLOWED_USERS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let skip_permissions = std::env::var("EARL_SKIP_PERMISSIONS")
            .map(|v| v == "true" || v == "TRUE")
            .unwrap_or(false);

        Ok(Self {
            mattermost_url,
            mattermost_bot_token,
            mattermost_bot_id,
            channels,
            allowed_users,
            skip_permissions,
            model: std::env::var("EARL_MODEL").ok(),
            claude_home: std::env::var("EARL_CLAUDE_HOME").ok(),
            tmux_poll_interval_secs: std::env::var("EARL_TMUX_POLL_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TMUX_POLL_INTERVAL_SECS),
            config_root: default_config_root(),
        })
    }

    /// The Mattermost WebSocket URL, derived by swapping the URL scheme.
    pub fn mattermost_ws_url(&self) -> String {
        if let Some(rest) = self.mattermost_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.mattermost_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.mattermost_url.clone()
        }
    }

    pub fn working_dir_for(&self, channel_id: &str) -> String {
        self.channels
            .iter()
            .find(|c| c.channel_id == channel_id)
            .map(|c| c.working_dir.clone())
            .unwrap_or_else(default_working_dir)
    }

    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == user_id)
    }
}

fn default_working_dir() -> String {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| EarlError::MissingEnvVar(name.to_string()))
}

fn validate_http_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(EarlError::NonHttpUrl(url.to_string()));
    }
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|_| EarlError::InvalidUrl(url.to_string()))
}

/// Parse `channel_id[:working_dir],channel_id[:working_dir],...`.
fn parse_channels(raw: &str) -> Vec<ChannelBinding> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, dir)) if !dir.is_empty() => ChannelBinding {
                channel_id: id.to_string(),
                working_dir: dir.to_string(),
            },
            _ => ChannelBinding {
                channel_id: entry.to_string(),
                working_dir: default_working_dir(),
            },
        })
        .collect()
}
