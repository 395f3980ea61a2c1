//! Global atomic counters for the analysis engine.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as one `info!` event, e.g. on
//! a health probe or at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::Disposition;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests_admitted: u64,
    pub requests_rejected: u64,
    pub runs_completed: u64,
    pub runs_degraded: u64,
    pub runs_timed_out: u64,
    pub runs_cancelled: u64,
    pub runs_failed: u64,
    pub policy_violations: u64,
    pub issues_streamed: u64,
    pub cloud_inferences: u64,
}

pub struct Metrics {
    requests_admitted: AtomicU64,
    requests_rejected: AtomicU64,
    runs_completed: AtomicU64,
    runs_degraded: AtomicU64,
    runs_timed_out: AtomicU64,
    runs_cancelled: AtomicU64,
    runs_failed: AtomicU64,
    policy_violations: AtomicU64,
    issues_streamed: AtomicU64,
    cloud_inferences: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            requests_admitted: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_degraded: AtomicU64::new(0),
            runs_timed_out: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
            issues_streamed: AtomicU64::new(0),
            cloud_inferences: AtomicU64::new(0),
        }
    }

    pub fn inc_admitted(&self) {
        bump(&self.requests_admitted, "requests_admitted");
    }

    pub fn inc_rejected(&self) {
        bump(&self.requests_rejected, "requests_rejected");
    }

    pub fn inc_issues_streamed(&self) {
        bump(&self.issues_streamed, "issues_streamed");
    }

    pub fn inc_cloud_inferences(&self) {
        bump(&self.cloud_inferences, "cloud_inferences");
    }

    /// Count one finished run under its disposition.
    pub fn record_disposition(&self, disposition: Disposition) {
        let (counter, name) = match disposition {
            Disposition::Completed => (&self.runs_completed, "runs_completed"),
            Disposition::Degraded => (&self.runs_degraded, "runs_degraded"),
            Disposition::TimedOut => (&self.runs_timed_out, "runs_timed_out"),
            Disposition::Cancelled => (&self.runs_cancelled, "runs_cancelled"),
            Disposition::Failed => (&self.runs_failed, "runs_failed"),
            Disposition::PolicyViolation => (&self.policy_violations, "policy_violations"),
        };
        bump(counter, name);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_admitted: load(&self.requests_admitted),
            requests_rejected: load(&self.requests_rejected),
            runs_completed: load(&self.runs_completed),
            runs_degraded: load(&self.runs_degraded),
            runs_timed_out: load(&self.runs_timed_out),
            runs_cancelled: load(&self.runs_cancelled),
            runs_failed: load(&self.runs_failed),
            policy_violations: load(&self.policy_violations),
            issues_streamed: load(&self.issues_streamed),
            cloud_inferences: load(&self.cloud_inferences),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            requests_admitted = s.requests_admitted,
            requests_rejected = s.requests_rejected,
            runs_completed = s.runs_completed,
            runs_degraded = s.runs_degraded,
            runs_timed_out = s.runs_timed_out,
            runs_cancelled = s.runs_cancelled,
            runs_failed = s.runs_failed,
            policy_violations = s.policy_violations,
            issues_streamed = s.issues_streamed,
            cloud_inferences = s.cloud_inferences,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.requests_admitted,
            &self.requests_rejected,
            &self.runs_completed,
            &self.runs_degraded,
            &self.runs_timed_out,
            &self.runs_cancelled,
            &self.runs_failed,
            &self.policy_violations,
            &self.issues_streamed,
            &self.cloud_inferences,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
