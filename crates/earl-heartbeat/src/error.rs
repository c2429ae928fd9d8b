use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("duplicate heartbeat definition name: {0}")]
    DuplicateName(String),

    #[error("failed to start heartbeat session: {0}")]
    Session(#[from] earl_assistant::SessionError),
}

pub type Result<T> = std::result::Result<T, HeartbeatError>;
