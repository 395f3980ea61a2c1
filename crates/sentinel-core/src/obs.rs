//! Structured observability hooks for the request lifecycle.
//!
//! Every function emits one event with a stable `event` field so log
//! pipelines can filter on it. All events carry `request_id` where one
//! exists; the worker also wraps each run in a [`request_span`].
//!
//! Events are emitted at `info!` unless noted. Set `SENTINEL_LOG` to tune
//! verbosity and `SENTINEL_LOG_FORMAT=json` for JSON lines.

use tracing::{error, info, warn};

use crate::domain::{Disposition, ExecutionTarget, RouteDecision, Stage, StageReport};

/// Span tagged with the request id, for `Instrument`-ing a run.
pub fn request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!("sentinel.request", request_id = %request_id)
}

pub fn emit_request_admitted(request_id: &str, path: &str, mode: &str, in_flight: usize) {
    info!(
        event = "request.admitted",
        request_id = %request_id,
        path = %path,
        mode = %mode,
        in_flight = in_flight,
    );
}

/// Admission refusals are logged, not audited.
pub fn emit_admission_rejected(request_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "admission.rejected", request_id = %request_id, reason = %reason);
}

pub fn emit_route_decided(decision: &RouteDecision) {
    let inference: Vec<&str> = decision
        .targets(Stage::Inference)
        .iter()
        .map(|t| t.as_str())
        .collect();
    info!(
        event = "route.decided",
        request_id = %decision.request_id,
        policy_version = decision.policy_version,
        mode = %decision.mode,
        sensitive = decision.is_sensitive(),
        air_gapped = decision.air_gapped,
        inference_targets = ?inference,
    );
}

pub fn emit_stage_finished(request_id: &str, report: &StageReport, issues: usize) {
    info!(
        event = "stage.finished",
        request_id = %request_id,
        stage = %report.stage,
        status = ?report.status,
        target = ?report.target.map(|t| t.as_str()),
        elapsed_ms = report.elapsed_ms,
        issues = issues,
    );
}

pub fn emit_run_finished(request_id: &str, disposition: Disposition, issues: usize, duration_ms: u64) {
    info!(
        event = "run.finished",
        request_id = %request_id,
        disposition = %disposition,
        issues = issues,
        duration_ms = duration_ms,
    );
}

/// A forbidden target was attempted. Always `error!`.
pub fn emit_routing_violation(request_id: &str, stage: Stage, target: ExecutionTarget, reason: &str) {
    error!(
        event = "routing.violation",
        request_id = %request_id,
        stage = %stage,
        target = %target,
        reason = %reason,
    );
}

/// The audit log could not be written; the engine halts.
pub fn emit_durability_failure(error: &dyn std::fmt::Display) {
    error!(event = "audit.durability_failure", error = %error);
}

pub fn emit_policy_installed(version: u64, revision: Option<&str>) {
    info!(event = "policy.installed", version = version, revision = ?revision);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_request_span_create() {
        let span = request_span("r-1");
        let _guard = span.enter();
    }

    #[traced_test]
    #[test]
    fn test_admission_events_carry_request_id() {
        emit_request_admitted("r-obs-1", "src/app.py", "auto", 3);
        emit_admission_rejected("r-obs-2", &"backpressure");
        assert!(logs_contain("request.admitted"));
        assert!(logs_contain("r-obs-1"));
        assert!(logs_contain("admission.rejected"));
    }

    #[traced_test]
    #[test]
    fn test_routing_violation_logged_at_error() {
        emit_routing_violation(
            "r-obs-3",
            Stage::Inference,
            ExecutionTarget::Cloud,
            "route permits cloud for a sensitive request",
        );
        assert!(logs_contain("routing.violation"));
        assert!(logs_contain("ERROR"));
    }

    #[traced_test]
    #[test]
    fn test_run_finished_reports_disposition() {
        emit_run_finished("r-obs-4", Disposition::Degraded, 2, 15);
        assert!(logs_contain("run.finished"));
        assert!(logs_contain("degraded"));
    }
}
