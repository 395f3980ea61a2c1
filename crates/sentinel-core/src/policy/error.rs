//! Error types for the policy module.

/// Errors produced while loading or validating a policy.
///
/// Every variant is fatal at startup. On hot reload the previous snapshot
/// stays installed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed policy: {0}")]
    Malformed(#[from] toml::de::Error),

    #[error("invalid pattern {pattern:?} in {section}: {reason}")]
    InvalidPattern {
        section: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("inconsistent policy: {0}")]
    Inconsistent(String),

    #[error("no policy source configured for reload")]
    NoSource,

    #[error("policy version {prepared} was superseded; current version is {current}")]
    Superseded { prepared: u64, current: u64 },
}

/// Result type for policy operations.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
