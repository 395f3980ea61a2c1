//! The audit sink abstraction.
//!
//! Guarantees every implementation must uphold:
//! - `append` assigns strictly increasing, gap-free `seq` values.
//! - A record returned by `append` is durable for that backend.
//! - Records are never updated or deleted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuditResult;
use crate::record::{AuditEntry, AuditRecord};

/// Position of the log's head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditHead {
    /// Sequence number the next append will receive.
    pub next_seq: u64,
    /// Digest of the last record (genesis digest when empty).
    pub last_digest: String,
}

/// Single-writer, append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Seal and durably append an entry. Returns only after the record is
    /// persisted; any error means the action is NOT recorded.
    async fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord>;

    /// Current head of the log.
    async fn head(&self) -> AuditResult<AuditHead>;

    /// Replay the full log in order.
    async fn read_all(&self) -> AuditResult<Vec<AuditRecord>>;
}
