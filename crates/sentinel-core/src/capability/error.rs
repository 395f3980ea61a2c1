//! Error types for external capabilities.

/// Errors produced by the structural parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("binary content cannot be parsed")]
    Binary,

    #[error("content is not valid UTF-8")]
    InvalidUtf8,

    #[error("file of {size} bytes exceeds parser limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

/// Errors produced by symbolic, inference, and embedding capabilities.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The cloud backend refused a sensitive-flagged request.
    #[error("cloud inference refused: request is flagged sensitive")]
    SensitiveRefused,

    #[error("cloud inference requires a credential")]
    MissingCredential,

    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("capability failed: {0}")]
    Failed(String),
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        CapabilityError::Transport(err.to_string())
    }
}

/// Result type for capability calls.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
