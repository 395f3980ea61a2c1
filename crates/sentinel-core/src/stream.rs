//! Per-request result streams.
//!
//! Each admitted request gets its own unbounded channel. Events carry a
//! per-request sequence number starting at 0; the completion event (or a
//! failure event) is always last. A disconnected client never blocks or
//! fails the run: sends to a dropped receiver are ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{AnalysisSummary, Issue, RequestId};
use crate::metrics::METRICS;

/// One event delivered to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// A new finding, or a severity upgrade of one already streamed.
    Issue {
        request_id: RequestId,
        seq: u64,
        issue: Issue,
    },
    Completed {
        request_id: RequestId,
        seq: u64,
        summary: AnalysisSummary,
    },
    /// The engine could not finish the run (audit durability failure).
    Failed {
        request_id: RequestId,
        seq: u64,
        error: String,
    },
}

impl AnalysisEvent {
    pub fn seq(&self) -> u64 {
        match self {
            AnalysisEvent::Issue { seq, .. }
            | AnalysisEvent::Completed { seq, .. }
            | AnalysisEvent::Failed { seq, .. } => *seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisEvent::Issue { .. })
    }
}

/// Sending half, owned by the run.
#[derive(Debug)]
pub struct StreamEmitter {
    request_id: RequestId,
    tx: mpsc::UnboundedSender<AnalysisEvent>,
    next_seq: u64,
    disconnected: bool,
}

impl StreamEmitter {
    pub fn channel(request_id: RequestId) -> (StreamEmitter, AnalysisStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = StreamEmitter {
            request_id: request_id.clone(),
            tx,
            next_seq: 0,
            disconnected: false,
        };
        (emitter, AnalysisStream { request_id, rx })
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// `true` once a send found the receiver gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn send(&mut self, build: impl FnOnce(RequestId, u64) -> AnalysisEvent) {
        let event = build(self.request_id.clone(), self.next_seq);
        self.next_seq += 1;
        if self.tx.send(event).is_err() && !self.disconnected {
            self.disconnected = true;
            tracing::debug!(request_id = %self.request_id, "client stream disconnected");
        }
    }

    pub fn emit_issue(&mut self, issue: Issue) {
        METRICS.inc_issues_streamed();
        self.send(|request_id, seq| AnalysisEvent::Issue {
            request_id,
            seq,
            issue,
        });
    }

    /// Emit the completion event and close the stream.
    pub fn complete(mut self, summary: AnalysisSummary) {
        self.send(|request_id, seq| AnalysisEvent::Completed {
            request_id,
            seq,
            summary,
        });
    }

    /// Emit a failure event and close the stream.
    pub fn fail(mut self, error: impl Into<String>) {
        let error = error.into();
        self.send(|request_id, seq| AnalysisEvent::Failed {
            request_id,
            seq,
            error,
        });
    }
}

/// Receiving half, handed to the client at admission.
#[derive(Debug)]
pub struct AnalysisStream {
    request_id: RequestId,
    rx: mpsc::UnboundedReceiver<AnalysisEvent>,
}

impl AnalysisStream {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Next event, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<AnalysisEvent> {
        self.rx.recv().await
    }

    /// Drain every event until the stream closes.
    pub async fn collect(mut self) -> Vec<AnalysisEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Disposition, IssueKind, Location, Severity, Stage};

    fn issue(line: u32) -> Issue {
        Issue::new(
            IssueKind::new("dynamic-eval"),
            Severity::Medium,
            Location::new("a.py", line, 1),
            "eval",
            Stage::Symbolic,
        )
    }

    fn summary(id: &RequestId) -> AnalysisSummary {
        AnalysisSummary {
            request_id: id.clone(),
            disposition: Disposition::Completed,
            issues: vec![],
            stages: vec![],
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_and_terminal_event() {
        let id = RequestId::new("r1");
        let (mut emitter, stream) = StreamEmitter::channel(id.clone());
        emitter.emit_issue(issue(1));
        emitter.emit_issue(issue(2));
        emitter.complete(summary(&id));

        let events = stream.collect().await;
        let seqs: Vec<u64> = events.iter().map(|e| e.seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(events[2].is_terminal());
        assert!(!events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_fail_emitter() {
        let id = RequestId::new("r2");
        let (mut emitter, stream) = StreamEmitter::channel(id.clone());
        drop(stream);
        emitter.emit_issue(issue(1));
        assert!(emitter.is_disconnected());
        emitter.complete(summary(&id));
    }

    #[test]
    fn test_event_wire_format() {
        let event = AnalysisEvent::Failed {
            request_id: RequestId::new("r"),
            seq: 3,
            error: "halted".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["seq"], 3);
    }
}
