use thiserror::Error;

/// Errors surfaced by the Mattermost REST client and WebSocket listener.
#[derive(Debug, Error)]
pub enum MattermostError {
    #[error("Mattermost request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mattermost returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket authentication failed: {0}")]
    AuthFailed(String),
}

pub type Result<T> = std::result::Result<T, MattermostError>;
