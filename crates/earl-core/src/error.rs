use thiserror::Error;

#[derive(Debug, Error)]
pub enum EarlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL must be http(s): {0}")]
    NonHttpUrl(String),

    #[error("chat platform transport error: {0}")]
    Transport(String),

    #[error("subprocess I/O error: {0}")]
    SubprocessIo(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EarlError {
    /// Short error code, used when a failure must be surfaced as a chat post
    /// rather than only logged (configuration errors, bad URLs).
    pub fn code(&self) -> &'static str {
        match self {
            EarlError::Config(_) => "CONFIG_ERROR",
            EarlError::MissingEnvVar(_) => "MISSING_ENV_VAR",
            EarlError::InvalidUrl(_) => "INVALID_URL",
            EarlError::NonHttpUrl(_) => "NON_HTTP_URL",
            EarlError::Transport(_) => "TRANSPORT_ERROR",
            EarlError::SubprocessIo(_) => "SUBPROCESS_IO_ERROR",
            EarlError::Serialization(_) => "SERIALIZATION_ERROR",
            EarlError::Io(_) => "IO_ERROR",
            EarlError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EarlError>;
