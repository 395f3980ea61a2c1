//! Admission errors.
//!
//! Every variant is returned before the request consumes any resources.

use crate::domain::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Workers and queue are both full.
    #[error("backpressure: {in_flight} requests in flight (capacity {capacity})")]
    Backpressure { in_flight: usize, capacity: usize },

    #[error("request id {0} is already in flight")]
    Duplicate(RequestId),

    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    /// Content did not match the client-declared hash.
    #[error("content hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("engine halted after an audit durability failure")]
    Halted,

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl AdmissionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::Backpressure { .. } => "backpressure",
            AdmissionError::Duplicate(_) => "duplicate",
            AdmissionError::TooLarge { .. } => "too_large",
            AdmissionError::HashMismatch { .. } => "hash_mismatch",
            AdmissionError::Invalid(_) => "invalid",
            AdmissionError::Halted => "halted",
            AdmissionError::ShuttingDown => "shutting_down",
        }
    }
}
