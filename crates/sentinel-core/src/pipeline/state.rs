//! Per-run state machine.
//!
//! ```text
//! Pending -> Parsing -> Gathering{retrieval, symbolic} -> Inferring -> Merging -> Done
//!               \______________________\______________________/
//!                               (early finish)
//! ```
//!
//! Gathering runs retrieval and symbolic analysis concurrently; the run may
//! leave it for `Inferring` only once both have reported. Any phase may jump
//! to `Merging` when the run stops early (parse failure, cancellation,
//! deadline, policy violation).

use std::fmt;

use tokio::time::Instant;

use crate::domain::{Disposition, RequestId, Stage, StageReport, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Parsing,
    Gathering {
        retrieval_pending: bool,
        symbolic_pending: bool,
    },
    Inferring,
    Merging,
    Done,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Parsing => "parsing",
            Phase::Gathering { .. } => "gathering",
            Phase::Inferring => "inferring",
            Phase::Merging => "merging",
            Phase::Done => "done",
        }
    }

    fn can_advance_to(&self, next: &Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Pending, Parsing) => true,
            (Parsing, Gathering { .. }) => true,
            (
                Gathering {
                    retrieval_pending: false,
                    symbolic_pending: false,
                },
                Inferring,
            ) => true,
            (Pending | Parsing | Gathering { .. } | Inferring, Merging) => true,
            (Merging, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// Why a run stopped before finishing every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    DeadlineExpired,
    PolicyViolation,
}

/// Mutable bookkeeping for one run. Owned by the coordinator task.
#[derive(Debug)]
pub struct PipelineRun {
    request_id: RequestId,
    phase: Phase,
    started: Instant,
    deadline: Instant,
    reports: Vec<StageReport>,
    interrupt: Option<Interrupt>,
}

impl PipelineRun {
    pub fn new(request_id: RequestId, deadline: Instant) -> Self {
        Self {
            request_id,
            phase: Phase::Pending,
            started: Instant::now(),
            deadline,
            reports: Vec::new(),
            interrupt: None,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), InvalidTransition> {
        if !self.phase.can_advance_to(&next) {
            return Err(InvalidTransition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Mark one gathering branch as reported.
    pub fn gathered(&mut self, stage: Stage) {
        if let Phase::Gathering {
            retrieval_pending,
            symbolic_pending,
        } = &mut self.phase
        {
            match stage {
                Stage::ContextRetrieval => *retrieval_pending = false,
                Stage::Symbolic => *symbolic_pending = false,
                _ => {}
            }
        }
    }

    pub fn record(&mut self, report: StageReport) {
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    /// Stages with no report yet, in pipeline order.
    pub fn unattempted(&self) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|s| self.report(*s).is_none())
            .collect()
    }

    pub fn interrupt(&mut self, why: Interrupt) {
        if self.interrupt.is_none() {
            self.interrupt = Some(why);
        }
    }

    pub fn interrupted(&self) -> Option<Interrupt> {
        self.interrupt
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The earlier of `now + budget` and the run deadline.
    pub fn stage_deadline(&self, budget: std::time::Duration) -> Instant {
        (Instant::now() + budget).min(self.deadline)
    }

    pub fn elapsed_ms(&self) -> u64 {
        millis(self.started.elapsed())
    }

    /// Terminal disposition, by precedence: cancelled, timed-out, failed
    /// (parse failure), policy-violation, degraded, completed.
    pub fn disposition(&self) -> Disposition {
        match self.interrupt {
            Some(Interrupt::Cancelled) => return Disposition::Cancelled,
            Some(Interrupt::DeadlineExpired) => return Disposition::TimedOut,
            _ => {}
        }
        if self
            .report(Stage::Parse)
            .is_some_and(|r| r.status != StageStatus::Completed)
        {
            return Disposition::Failed;
        }
        if self.interrupt == Some(Interrupt::PolicyViolation) {
            return Disposition::PolicyViolation;
        }
        if self.reports.iter().any(|r| r.status.is_degraded()) {
            return Disposition::Degraded;
        }
        Disposition::Completed
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run() -> PipelineRun {
        PipelineRun::new(RequestId::new("r"), Instant::now() + Duration::from_secs(30))
    }

    fn report(stage: Stage, status: StageStatus) -> StageReport {
        StageReport {
            stage,
            status,
            target: None,
            elapsed_ms: 0,
            detail: None,
        }
    }

    fn gathering() -> Phase {
        Phase::Gathering {
            retrieval_pending: true,
            symbolic_pending: true,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut r = run();
        r.advance(Phase::Parsing).unwrap();
        r.advance(gathering()).unwrap();
        assert!(r.advance(Phase::Inferring).is_err());
        r.gathered(Stage::Symbolic);
        assert!(r.advance(Phase::Inferring).is_err());
        r.gathered(Stage::ContextRetrieval);
        r.advance(Phase::Inferring).unwrap();
        r.advance(Phase::Merging).unwrap();
        r.advance(Phase::Done).unwrap();
    }

    #[test]
    fn test_cannot_skip_merging_or_go_back() {
        let mut r = run();
        r.advance(Phase::Parsing).unwrap();
        let err = r.advance(Phase::Done).unwrap_err();
        assert_eq!(err.from, "parsing");
        assert!(r.advance(Phase::Pending).is_err());
        r.advance(Phase::Merging).unwrap();
        assert!(r.advance(Phase::Inferring).is_err());
    }

    #[test]
    fn test_disposition_precedence() {
        let mut r = run();
        r.record(report(Stage::Parse, StageStatus::Completed));
        r.record(report(Stage::ContextRetrieval, StageStatus::TimedOut));
        assert_eq!(r.disposition(), Disposition::Degraded);

        r.interrupt(Interrupt::PolicyViolation);
        assert_eq!(r.disposition(), Disposition::PolicyViolation);

        let mut c = run();
        c.record(report(Stage::Parse, StageStatus::Failed));
        assert_eq!(c.disposition(), Disposition::Failed);
        c.interrupt(Interrupt::Cancelled);
        c.interrupt(Interrupt::DeadlineExpired);
        assert_eq!(c.disposition(), Disposition::Cancelled);
    }

    #[test]
    fn test_clean_run_completes() {
        let mut r = run();
        for s in Stage::ALL {
            r.record(report(s, StageStatus::Completed));
        }
        assert_eq!(r.disposition(), Disposition::Completed);
        assert!(r.unattempted().is_empty());
    }

    #[test]
    fn test_unattempted_lists_missing_stages() {
        let mut r = run();
        r.record(report(Stage::Parse, StageStatus::Completed));
        r.record(report(Stage::Symbolic, StageStatus::Completed));
        assert_eq!(
            r.unattempted(),
            vec![Stage::ContextRetrieval, Stage::Inference]
        );
    }

    #[test]
    fn test_stage_deadline_capped_by_run_deadline() {
        let r = PipelineRun::new(RequestId::new("r"), Instant::now() + Duration::from_millis(50));
        assert!(r.stage_deadline(Duration::from_secs(10)) <= r.deadline());
    }

    #[test]
    fn test_millis_saturates() {
        use std::time::Duration;
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
