//! Run dispositions and final summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::issue::Issue;
use super::request::RequestId;
use super::route::{ExecutionTarget, Stage};

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// Every stage ran on a permitted target.
    Completed,
    /// At least one stage was skipped, failed, or exceeded its budget.
    Degraded,
    /// The request deadline expired; collected issues are returned.
    TimedOut,
    Cancelled,
    /// Structural parsing failed, so no analysis could run.
    Failed,
    /// A forbidden execution target was attempted. Compliance relevant.
    PolicyViolation,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::Degraded => "degraded",
            Disposition::TimedOut => "timed-out",
            Disposition::Cancelled => "cancelled",
            Disposition::Failed => "failed",
            Disposition::PolicyViolation => "policy-violation",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage result class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    TimedOut,
    Failed,
    Blocked,
}

impl StageStatus {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, StageStatus::Completed)
    }
}

/// What happened to one stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ExecutionTarget>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Final aggregated result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub request_id: RequestId,
    pub disposition: Disposition,
    /// Merged issues, ordered by stage priority then discovery order.
    pub issues: Vec<Issue>,
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
}

impl AnalysisSummary {
    pub fn degraded_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|s| s.status.is_degraded())
            .map(|s| s.stage)
            .collect()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_wire_format() {
        assert_eq!(
            serde_json::to_string(&Disposition::TimedOut).unwrap(),
            "\"timed-out\""
        );
        assert_eq!(
            serde_json::to_string(&Disposition::PolicyViolation).unwrap(),
            "\"policy-violation\""
        );
        assert_eq!(Disposition::Cancelled.to_string(), "cancelled");
    }
}
