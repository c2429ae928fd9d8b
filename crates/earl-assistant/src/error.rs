use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn assistant process: {0}")]
    Spawn(std::io::Error),

    #[error("failed to write mcp config: {0}")]
    McpConfig(std::io::Error),

    #[error("failed to persist session record: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
