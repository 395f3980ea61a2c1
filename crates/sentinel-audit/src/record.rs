//! Audit record model and hash-chain sealing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuditResult;

/// `prev_digest` of the first record in a log.
pub const GENESIS_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A policy snapshot was installed (startup or hot reload).
    PolicyLoaded,
    /// The router produced a RouteDecision for a request.
    RouteDecided,
    StageCompleted,
    StageSkipped,
    StageTimedOut,
    StageFailed,
    /// A forbidden execution target was attempted and blocked.
    RoutingViolation,
    /// Terminal record for a request.
    RunFinished,
    FixApplied,
    AuthEvent,
}

impl AuditKind {
    /// Records that describe one pipeline stage.
    pub fn is_stage(&self) -> bool {
        matches!(
            self,
            AuditKind::StageCompleted
                | AuditKind::StageSkipped
                | AuditKind::StageTimedOut
                | AuditKind::StageFailed
        )
    }

    /// The record that closes a request's trail.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditKind::RunFinished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::PolicyLoaded => "policy_loaded",
            AuditKind::RouteDecided => "route_decided",
            AuditKind::StageCompleted => "stage_completed",
            AuditKind::StageSkipped => "stage_skipped",
            AuditKind::StageTimedOut => "stage_timed_out",
            AuditKind::StageFailed => "stage_failed",
            AuditKind::RoutingViolation => "routing_violation",
            AuditKind::RunFinished => "run_finished",
            AuditKind::FixApplied => "fix_applied",
            AuditKind::AuthEvent => "auth_event",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unsealed record as submitted by a caller. The sink assigns sequence,
/// timestamp, and chain digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub request_id: Option<String>,
    pub payload: serde_json::Value,
}

impl AuditEntry {
    /// A process-level entry (policy load, auth event).
    pub fn new(kind: AuditKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            request_id: None,
            payload,
        }
    }

    /// An entry scoped to one analysis request.
    pub fn for_request(
        kind: AuditKind,
        request_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            request_id: Some(request_id.into()),
            payload,
        }
    }
}

/// A sealed, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the log's total order, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: serde_json::Value,
    /// Digest of the preceding record ([`GENESIS_DIGEST`] for seq 0).
    pub prev_digest: String,
    /// `sha256(prev_digest || canonical body)`, hex encoded.
    pub digest: String,
}

/// The hashed portion of a record. Field order is fixed and `serde_json`
/// object keys serialize sorted, so the encoding is deterministic.
#[derive(Serialize)]
struct RecordBody<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    kind: AuditKind,
    request_id: &'a Option<String>,
    payload: &'a serde_json::Value,
}

impl AuditRecord {
    /// Seal `entry` at position `seq`, chained onto `prev_digest`.
    pub fn seal(
        entry: AuditEntry,
        seq: u64,
        timestamp: DateTime<Utc>,
        prev_digest: &str,
    ) -> AuditResult<Self> {
        let mut record = AuditRecord {
            seq,
            timestamp,
            kind: entry.kind,
            request_id: entry.request_id,
            payload: entry.payload,
            prev_digest: prev_digest.to_string(),
            digest: String::new(),
        };
        record.digest = record.compute_digest()?;
        Ok(record)
    }

    /// Recompute this record's digest from its body and `prev_digest`.
    pub fn compute_digest(&self) -> AuditResult<String> {
        let body = RecordBody {
            seq: self.seq,
            timestamp: &self.timestamp,
            kind: self.kind,
            request_id: &self.request_id,
            payload: &self.payload,
        };
        let canonical = serde_json::to_vec(&body)?;
        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_bytes());
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Look up a string field in the payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AuditEntry {
        AuditEntry::for_request(
            AuditKind::StageCompleted,
            "req-1",
            serde_json::json!({"stage": "symbolic", "target": "local"}),
        )
    }

    #[test]
    fn test_seal_is_deterministic() {
        let ts = Utc::now();
        let a = AuditRecord::seal(entry(), 3, ts, GENESIS_DIGEST).unwrap();
        let b = AuditRecord::seal(entry(), 3, ts, GENESIS_DIGEST).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_digest_depends_on_prev() {
        let ts = Utc::now();
        let a = AuditRecord::seal(entry(), 1, ts, GENESIS_DIGEST).unwrap();
        let b = AuditRecord::seal(entry(), 1, ts, &a.digest).unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_tampered_payload_changes_digest() {
        let mut rec = AuditRecord::seal(entry(), 0, Utc::now(), GENESIS_DIGEST).unwrap();
        rec.payload = serde_json::json!({"stage": "inference", "target": "cloud"});
        assert_ne!(rec.compute_digest().unwrap(), rec.digest);
    }

    #[test]
    fn test_digest_survives_json_roundtrip() {
        let rec = AuditRecord::seal(entry(), 0, Utc::now(), GENESIS_DIGEST).unwrap();
        let line = serde_json::to_string(&rec).unwrap();
        let back: AuditRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.compute_digest().unwrap(), rec.digest);
    }

    #[test]
    fn test_kind_classification() {
        assert!(AuditKind::StageTimedOut.is_stage());
        assert!(!AuditKind::RouteDecided.is_stage());
        assert!(AuditKind::RunFinished.is_terminal());
        assert_eq!(AuditKind::RoutingViolation.to_string(), "routing_violation");
    }
}
