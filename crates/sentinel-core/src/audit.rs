//! Engine-side audit trail.
//!
//! Wraps an [`AuditSink`] with one typed method per recorded action. The
//! caller awaits each append before reporting the action as done. The first
//! failed append latches the trail into the halted state; the engine then
//! refuses new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use sentinel_audit::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditResult, AuditSink};

use crate::domain::{
    Disposition, ExecutionTarget, FixSafety, IssueKind, Location, RequestId, RouteDecision, Stage,
    StageReport, StageStatus,
};
use crate::obs;
use crate::policy::Policy;

/// A fix the client applied, reported back for the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixApplication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub kind: IssueKind,
    pub location: Location,
    #[serde(default)]
    pub fix_safety: FixSafety,
    /// Who applied it, e.g. a user name or `auto`.
    pub actor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    Login,
    Logout,
    TokenRefreshed,
    Denied,
}

/// An authentication event forwarded by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub subject: String,
    pub action: AuthAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Typed, halting front end to the audit sink.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    halted: Arc<AtomicBool>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    async fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        if self.is_halted() {
            return Err(AuditError::Poisoned);
        }
        match self.sink.append(entry).await {
            Ok(record) => Ok(record),
            Err(e) => {
                if !self.halted.swap(true, Ordering::SeqCst) {
                    obs::emit_durability_failure(&e);
                }
                Err(e)
            }
        }
    }

    pub async fn policy_loaded(&self, policy: &Policy) -> AuditResult<AuditRecord> {
        self.append(AuditEntry::new(AuditKind::PolicyLoaded, policy.audit_payload()))
            .await
    }

    pub async fn route_decided(&self, decision: &RouteDecision) -> AuditResult<AuditRecord> {
        self.append(AuditEntry::for_request(
            AuditKind::RouteDecided,
            decision.request_id.as_str(),
            decision.audit_payload(),
        ))
        .await
    }

    /// One record per stage outcome.
    ///
    /// `attempted` lists every target the stage sent data to, in order, so
    /// a failed cloud call that fell back to local still shows up.
    pub async fn stage(
        &self,
        request_id: &RequestId,
        report: &StageReport,
        attempted: &[ExecutionTarget],
        issues: usize,
    ) -> AuditResult<AuditRecord> {
        let kind = match report.status {
            StageStatus::Completed => AuditKind::StageCompleted,
            StageStatus::Skipped | StageStatus::Blocked => AuditKind::StageSkipped,
            StageStatus::TimedOut => AuditKind::StageTimedOut,
            StageStatus::Failed => AuditKind::StageFailed,
        };
        let mut payload = json!({
            "stage": report.stage.as_str(),
            "status": report.status,
            "elapsed_ms": report.elapsed_ms,
            "issues": issues,
            "attempted_targets": attempted.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        });
        if let Some(target) = report.target {
            payload["target"] = json!(target.as_str());
        }
        if let Some(detail) = &report.detail {
            payload["detail"] = json!(detail);
        }
        self.append(AuditEntry::for_request(kind, request_id.as_str(), payload))
            .await
    }

    /// A forbidden target was attempted and blocked. The blocked target is
    /// recorded under `blocked_target`, never `target`: nothing executed.
    pub async fn routing_violation(
        &self,
        request_id: &RequestId,
        stage: Stage,
        blocked: ExecutionTarget,
        reason: &str,
    ) -> AuditResult<AuditRecord> {
        self.append(AuditEntry::for_request(
            AuditKind::RoutingViolation,
            request_id.as_str(),
            json!({
                "stage": stage.as_str(),
                "blocked_target": blocked.as_str(),
                "reason": reason,
            }),
        ))
        .await
    }

    /// Terminal record. Nothing is recorded for the request afterwards.
    pub async fn run_finished(
        &self,
        request_id: &RequestId,
        disposition: Disposition,
        issues: usize,
        duration_ms: u64,
        degraded: &[Stage],
        unattempted: &[Stage],
    ) -> AuditResult<AuditRecord> {
        self.append(AuditEntry::for_request(
            AuditKind::RunFinished,
            request_id.as_str(),
            json!({
                "disposition": disposition.as_str(),
                "issues": issues,
                "duration_ms": duration_ms,
                "degraded_stages": degraded.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                "unattempted_stages": unattempted.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            }),
        ))
        .await
    }

    pub async fn fix_applied(&self, fix: &FixApplication) -> AuditResult<AuditRecord> {
        let payload = serde_json::to_value(fix)?;
        let entry = match &fix.request_id {
            Some(id) => AuditEntry::for_request(AuditKind::FixApplied, id.as_str(), payload),
            None => AuditEntry::new(AuditKind::FixApplied, payload),
        };
        self.append(entry).await
    }

    pub async fn auth_event(&self, event: &AuthEvent) -> AuditResult<AuditRecord> {
        self.append(AuditEntry::new(
            AuditKind::AuthEvent,
            serde_json::to_value(event)?,
        ))
        .await
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_audit::MemoryAuditLog;

    fn report(status: StageStatus, target: Option<ExecutionTarget>) -> StageReport {
        StageReport {
            stage: Stage::Inference,
            status,
            target,
            elapsed_ms: 12,
            detail: Some("ok".to_string()),
        }
    }

    #[tokio::test]
    async fn test_stage_record_payload() {
        let log = Arc::new(MemoryAuditLog::new());
        let trail = AuditTrail::new(log.clone());
        let id = RequestId::new("r1");
        let rec = trail
            .stage(
                &id,
                &report(StageStatus::Completed, Some(ExecutionTarget::Local)),
                &[ExecutionTarget::Local],
                3,
            )
            .await
            .unwrap();
        assert_eq!(rec.kind, AuditKind::StageCompleted);
        assert_eq!(rec.payload_str("target"), Some("local"));
        assert_eq!(rec.payload["issues"], 3);
        assert_eq!(rec.payload["attempted_targets"], json!(["local"]));
    }

    #[tokio::test]
    async fn test_violation_uses_blocked_target_field() {
        let log = Arc::new(MemoryAuditLog::new());
        let trail = AuditTrail::new(log.clone());
        let rec = trail
            .routing_violation(
                &RequestId::new("r1"),
                Stage::Inference,
                ExecutionTarget::Cloud,
                "sensitive",
            )
            .await
            .unwrap();
        assert_eq!(rec.payload_str("blocked_target"), Some("cloud"));
        assert!(rec.payload.get("target").is_none());
    }

    #[tokio::test]
    async fn test_failed_append_halts_trail() {
        let log = Arc::new(MemoryAuditLog::failing_after(1));
        let trail = AuditTrail::new(log.clone());
        let policy = Policy::builtin().unwrap();
        trail.policy_loaded(&policy).await.unwrap();
        assert!(!trail.is_halted());

        assert!(trail.policy_loaded(&policy).await.is_err());
        assert!(trail.is_halted());
        assert!(matches!(
            trail.policy_loaded(&policy).await,
            Err(AuditError::Poisoned)
        ));
        assert_eq!(log.records().len(), 1);
    }

    #[tokio::test]
    async fn test_fix_and_auth_records() {
        let log = Arc::new(MemoryAuditLog::new());
        let trail = AuditTrail::new(log.clone());
        trail
            .fix_applied(&FixApplication {
                request_id: Some(RequestId::new("r9")),
                kind: IssueKind::new("weak-hash"),
                location: Location::new("a.py", 2, 5),
                fix_safety: FixSafety::AutoFixableLowRisk,
                actor: "auto".to_string(),
            })
            .await
            .unwrap();
        trail
            .auth_event(&AuthEvent {
                subject: "dev@example.com".to_string(),
                action: AuthAction::Login,
                provider: Some("sso".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(log.kinds_for("r9"), vec![AuditKind::FixApplied]);
        let all = log.records();
        assert_eq!(all[1].kind, AuditKind::AuthEvent);
        assert_eq!(all[1].payload["action"], "login");
    }
}
