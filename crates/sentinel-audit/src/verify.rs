//! Log parsing and hash-chain verification.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditRecord, GENESIS_DIGEST};

/// The first point at which a chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub seq: u64,
    pub reason: String,
}

/// Parse JSON Lines text into records. Blank lines are ignored.
pub fn parse_log(text: &str) -> AuditResult<Vec<AuditRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<AuditRecord>(line).map_err(|e| AuditError::Corrupt {
                line: idx + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Read and parse a log file synchronously (CLI use).
pub fn read_log(path: impl AsRef<Path>) -> AuditResult<Vec<AuditRecord>> {
    let text = std::fs::read_to_string(path)?;
    parse_log(&text)
}

/// Verify sequence contiguity, chain links, and record digests.
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), ChainBreak> {
    let mut expected_prev = GENESIS_DIGEST.to_string();

    for (idx, record) in records.iter().enumerate() {
        let expected_seq = idx as u64;
        if record.seq != expected_seq {
            return Err(ChainBreak {
                seq: record.seq,
                reason: format!("expected seq {expected_seq}"),
            });
        }
        if record.prev_digest != expected_prev {
            return Err(ChainBreak {
                seq: record.seq,
                reason: "prev_digest does not match preceding record".to_string(),
            });
        }
        let recomputed = record.compute_digest().map_err(|e| ChainBreak {
            seq: record.seq,
            reason: e.to_string(),
        })?;
        if recomputed != record.digest {
            return Err(ChainBreak {
                seq: record.seq,
                reason: "record digest mismatch".to_string(),
            });
        }
        expected_prev = record.digest.clone();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AuditEntry, AuditKind};
    use chrono::Utc;

    fn chain(n: u64) -> Vec<AuditRecord> {
        let mut prev = GENESIS_DIGEST.to_string();
        (0..n)
            .map(|seq| {
                let rec = AuditRecord::seal(
                    AuditEntry::new(AuditKind::AuthEvent, serde_json::json!({"n": seq})),
                    seq,
                    Utc::now(),
                    &prev,
                )
                .unwrap();
                prev = rec.digest.clone();
                rec
            })
            .collect()
    }

    #[test]
    fn test_valid_chain_verifies() {
        assert!(verify_chain(&chain(5)).is_ok());
        assert!(verify_chain(&[]).is_ok());
    }

    #[test]
    fn test_gap_in_seq_detected() {
        let mut records = chain(4);
        records.remove(2);
        let brk = verify_chain(&records).unwrap_err();
        assert_eq!(brk.seq, 3);
    }

    #[test]
    fn test_edited_payload_detected() {
        let mut records = chain(3);
        records[1].payload = serde_json::json!({"n": 99});
        let brk = verify_chain(&records).unwrap_err();
        assert_eq!(brk.seq, 1);
        assert!(brk.reason.contains("digest mismatch"));
    }

    #[test]
    fn test_parse_log_reports_line_number() {
        let good = serde_json::to_string(&chain(1)[0]).unwrap();
        let text = format!("{good}\n\nnot json\n");
        match parse_log(&text) {
            Err(AuditError::Corrupt { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
