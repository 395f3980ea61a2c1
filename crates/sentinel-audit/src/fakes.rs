//! In-memory audit sink (testing only)
//!
//! `MemoryAuditLog` satisfies the `AuditSink` contract without touching the
//! filesystem. It can be configured to start failing after a number of
//! appends to exercise durability-failure paths.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditEntry, AuditKind, AuditRecord, GENESIS_DIGEST};
use crate::sink::{AuditHead, AuditSink};

#[derive(Debug, Default)]
struct State {
    records: Vec<AuditRecord>,
    appends: usize,
}

/// In-memory audit log backed by a `Vec<AuditRecord>`.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    state: Mutex<State>,
    fail_after: Option<usize>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose appends fail once `n` records have been written.
    pub fn failing_after(n: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_after: Some(n),
        }
    }

    /// Snapshot of every record appended so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Records scoped to one request, in log order.
    pub fn records_for(&self, request_id: &str) -> Vec<AuditRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect()
    }

    /// Kinds of the records scoped to one request, in log order.
    pub fn kinds_for(&self, request_id: &str) -> Vec<AuditKind> {
        self.records_for(request_id).iter().map(|r| r.kind).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if state.appends >= limit {
                return Err(AuditError::Unavailable(format!(
                    "injected failure after {limit} appends"
                )));
            }
        }
        let seq = state.records.len() as u64;
        let prev = state
            .records
            .last()
            .map(|r| r.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());
        let record = AuditRecord::seal(entry, seq, Utc::now(), &prev)?;
        state.records.push(record.clone());
        state.appends += 1;
        Ok(record)
    }

    async fn head(&self) -> AuditResult<AuditHead> {
        let state = self.state.lock().unwrap();
        Ok(AuditHead {
            next_seq: state.records.len() as u64,
            last_digest: state
                .records
                .last()
                .map(|r| r.digest.clone())
                .unwrap_or_else(|| GENESIS_DIGEST.to_string()),
        })
    }

    async fn read_all(&self) -> AuditResult<Vec<AuditRecord>> {
        Ok(self.records())
    }
}
