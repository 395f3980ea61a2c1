//! Error types for the audit log.

use thiserror::Error;

/// Errors produced while appending to or reading the audit log.
///
/// Any append error is a durability failure: callers must not keep operating
/// as if the action had been recorded.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt audit log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("audit chain broken at seq {seq}: {reason}")]
    ChainBroken { seq: u64, reason: String },

    #[error("audit writer is poisoned by an earlier failed append")]
    Poisoned,

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Result type for audit operations.
pub type AuditResult<T> = std::result::Result<T, AuditError>;
