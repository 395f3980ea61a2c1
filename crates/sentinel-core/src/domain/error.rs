//! Top-level error taxonomy for the engine.
//!
//! Admission, stage, and routing failures are reported per request through
//! dispositions; the errors here are the ones that stop the engine itself.

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or inconsistent policy. Fatal at startup.
    #[error("policy error: {0}")]
    Policy(#[from] crate::policy::PolicyError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("capability error: {0}")]
    Capability(#[from] crate::capability::CapabilityError),

    /// The audit trail could not be written. The engine halts.
    #[error("audit durability failure: {0}")]
    Durability(#[from] sentinel_audit::AuditError),

    #[error("engine halted after a durability failure")]
    Halted,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
