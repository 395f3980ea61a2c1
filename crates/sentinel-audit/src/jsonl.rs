//! Durable JSON Lines audit sink.
//!
//! One record per line. Each append writes the full line and calls
//! `sync_data` before returning, so a record handed back to the caller
//! survives a crash. The writer state sits behind a single async mutex,
//! which makes the append path single-writer and totally ordered.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditEntry, AuditRecord, GENESIS_DIGEST};
use crate::sink::{AuditHead, AuditSink};
use crate::verify::{parse_log, verify_chain};

struct WriterState {
    file: File,
    next_seq: u64,
    last_digest: String,
    /// Set after a failed write; the tail of the file is then untrusted.
    poisoned: bool,
}

/// File-backed audit log.
pub struct JsonlAuditLog {
    path: PathBuf,
    state: Mutex<WriterState>,
}

impl JsonlAuditLog {
    /// Open (or create) the log at `path`.
    ///
    /// An existing log is parsed and its chain verified; appends continue
    /// from its head. A corrupt or broken log is refused rather than
    /// silently extended.
    pub async fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let (next_seq, last_digest) = match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let records = parse_log(&text)?;
                if let Err(brk) = verify_chain(&records) {
                    return Err(AuditError::ChainBroken {
                        seq: brk.seq,
                        reason: brk.reason,
                    });
                }
                match records.last() {
                    Some(last) => (last.seq + 1, last.digest.clone()),
                    None => (0, GENESIS_DIGEST.to_string()),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (0, GENESIS_DIGEST.to_string())
            }
            Err(e) => return Err(AuditError::Io(e)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), next_seq, "audit log opened");

        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                file,
                next_seq,
                last_digest,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        let mut state = self.state.lock().await;
        if state.poisoned {
            return Err(AuditError::Poisoned);
        }

        let record = AuditRecord::seal(entry, state.next_seq, Utc::now(), &state.last_digest)?;
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let written = async {
            state.file.write_all(&line).await?;
            state.file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            state.poisoned = true;
            error!(path = %self.path.display(), seq = record.seq, error = %e, "audit append failed");
            return Err(AuditError::Io(e));
        }

        state.next_seq += 1;
        state.last_digest = record.digest.clone();
        debug!(seq = record.seq, kind = %record.kind, "audit record appended");
        Ok(record)
    }

    async fn head(&self) -> AuditResult<AuditHead> {
        let state = self.state.lock().await;
        Ok(AuditHead {
            next_seq: state.next_seq,
            last_digest: state.last_digest.clone(),
        })
    }

    async fn read_all(&self) -> AuditResult<Vec<AuditRecord>> {
        // Hold the writer lock so no half-written line is observed.
        let _state = self.state.lock().await;
        let text = tokio::fs::read_to_string(&self.path).await?;
        parse_log(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AuditKind;

    #[tokio::test]
    async fn test_append_assigns_sequential_seq() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::open(dir.path().join("audit.jsonl"))
            .await
            .unwrap();

        let a = log
            .append(AuditEntry::new(AuditKind::PolicyLoaded, serde_json::json!({"version": 1})))
            .await
            .unwrap();
        let b = log
            .append(AuditEntry::for_request(
                AuditKind::RouteDecided,
                "req-1",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(b.prev_digest, a.digest);
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("audit.jsonl");
        let log = JsonlAuditLog::open(&path).await.unwrap();
        assert_eq!(log.head().await.unwrap().next_seq, 0);
        assert!(path.exists());
    }
}
