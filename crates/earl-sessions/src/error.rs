use thiserror::Error;

/// Errors that can occur against the Persistent Store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No persisted record exists for this thread.
    #[error("no persisted session for thread: {thread_id}")]
    NotFound { thread_id: String },

    /// The store file exists but could not be written atomically.
    #[error("failed to persist sessions store: {0}")]
    Io(#[from] std::io::Error),

    /// The store document failed to (de)serialize.
    #[error("sessions store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
