//! Sentinel audit log.
//!
//! The audit log is the system's source of truth for "what happened": an
//! ordered, append-only sequence of immutable records, each linked to its
//! predecessor by a SHA-256 hash chain.
//!
//! - [`record`]: `AuditKind`, `AuditEntry`, `AuditRecord`
//! - [`sink`]: the `AuditSink` trait every writer implements
//! - [`jsonl`]: durable JSON Lines file sink (fsync per append)
//! - [`fakes`]: in-memory sink for tests
//! - [`verify`]: log parsing and chain verification

pub mod error;
pub mod fakes;
pub mod jsonl;
pub mod record;
pub mod sink;
pub mod verify;

pub use error::{AuditError, AuditResult};
pub use fakes::MemoryAuditLog;
pub use jsonl::JsonlAuditLog;
pub use record::{AuditEntry, AuditKind, AuditRecord, GENESIS_DIGEST};
pub use sink::{AuditHead, AuditSink};
pub use verify::{parse_log, read_log, verify_chain, ChainBreak};
